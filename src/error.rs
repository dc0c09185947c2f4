use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Clustering failed: {0}")]
    Clustering(String),

    #[error("Rendering failed: {0}")]
    Rendering(String),

    #[error("Invalid external cluster table: {0}")]
    InvalidExternalClusters(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<bincode::Error> for PipelineError {
    fn from(e: bincode::Error) -> Self {
        PipelineError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Serialization(e.to_string())
    }
}

impl From<quick_xml::Error> for PipelineError {
    fn from(e: quick_xml::Error) -> Self {
        PipelineError::Graph(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for PipelineError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        PipelineError::Graph(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
