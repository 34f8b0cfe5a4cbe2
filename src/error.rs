use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Yaml Error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("expected 28 keypoint coordinates, got {len}")]
    InvalidKeypoints { len: usize },

    #[error("Frame source error: {0}")]
    FrameSource(String),

    #[error("Config Error: {0}")]
    Config(String),
}
