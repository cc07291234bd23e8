use serde::Deserialize;
use utoipa::{OpenApi, ToSchema};
use crate::{handlers, snapshot};

/// Form fields understood by the query endpoint. Only `request` and
/// `reqtype` are always required; the rest depend on the operation.
#[allow(dead_code)]
#[derive(Debug, Deserialize, ToSchema)]
pub struct QueryForm {
    /// Must be `True`.
    pub request: String,
    /// One of `getstate`, `setstate`, `setgroup`, `setmode`, `setlock`,
    /// `getmodule`, `getconfig`, `getconfigxml`, `setconfig`, `reconnect`,
    /// `confirmstate`, `setallmode`, `reloadconfig`, `getpresets`,
    /// `setpreset`, `runpreset`, `setpresetview`, `getroomgroups`,
    /// `setroomgroups`, `getdebuglog`, `dobackup`.
    pub reqtype: String,
    pub devid: Option<String>,
    pub value: Option<String>,
    pub isintensity: Option<String>,
    pub isasync: Option<String>,
    pub skiptime: Option<String>,
    pub group: Option<String>,
    pub mode: Option<String>,
    pub lock: Option<String>,
    pub module: Option<String>,
    pub section: Option<String>,
    /// JSON text.
    pub configdata: Option<String>,
    pub state: Option<String>,
    pub presetname: Option<String>,
    /// JSON text for `setpreset`, a name for `runpreset`.
    pub preset: Option<String>,
    /// JSON text.
    pub presetlist: Option<String>,
    /// JSON text.
    pub rooms: Option<String>,
    pub debuglevel: Option<String>,
    pub clientid: Option<String>,
    /// Content type for the reply; defaults to `application/json`.
    pub return_type: Option<String>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::handle_query,
        handlers::handle_config_xml,
    ),
    components(
        schemas(QueryForm, snapshot::StateSnapshot)
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_query_endpoints() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/"));
        assert!(doc.paths.paths.contains_key("/configxml"));
    }
}
