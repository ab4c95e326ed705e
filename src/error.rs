pub type PuppetryResult<T> = Result<T, PuppetryError>;

#[derive(thiserror::Error, Debug)]
pub enum PuppetryError {
    #[error("load error: {0}")]
    Load(String),

    #[error("descriptor error: {0}")]
    Descriptor(String),

    #[error("render error: {0}")]
    Render(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PuppetryError {
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load(msg.into())
    }

    pub fn descriptor(msg: impl Into<String>) -> Self {
        Self::Descriptor(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }
}
