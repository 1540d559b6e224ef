#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] report_json::JsonError),
    #[error("the report path '{0}' has no file name")]
    InvalidPath(std::path::PathBuf),
}
