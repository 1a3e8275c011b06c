use serde::Deserialize;

/// Error body returned by the coordination service on failed operations.
///
/// Example: `{"errorCode":100,"message":"Key not found","cause":"/foo","index":12}`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerErrorBody {
    pub error_code: u32,
    pub message: String,
    #[serde(default)]
    pub cause: Option<String>,
    #[serde(default)]
    pub index: Option<u64>,
}
