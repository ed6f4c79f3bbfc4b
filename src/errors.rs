#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("network error: {0}")]
    Network(String),

    #[error("dataset not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Parsing(#[from] ParseError),

    #[error("{0}")]
    SchemaEvolution(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid state: {0}")]
    State(String),

    #[error("an error occurred with the database connection: {0}")]
    Database(#[from] postgres::Error),

    #[error("an error occurred with the embedded database: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("could not find {0}")]
    NotFound(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),

    #[error(transparent)]
    DateFormat(#[from] chrono::ParseError),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::Parsing(ParseError::Csv(err))
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Parsing(ParseError::Xml(err))
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Error::Parsing(ParseError::XmlAttr(err))
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        Error::Network(err.to_string())
    }
}
