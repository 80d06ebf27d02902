use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid logging filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    #[error(transparent)]
    Tls(#[from] enforcer_transport_tls::TlsError),
}
