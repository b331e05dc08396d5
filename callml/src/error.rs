use thiserror::Error;

/// Errors produced while reading a CallML document.
#[derive(Debug, Error)]
pub enum CallMlError {
    #[error("malformed xml: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed xml attribute: {0}")]
    Attr(#[from] quick_xml::events::attributes::AttrError),

    #[error("document root must be <Response>, found <{0}>")]
    MissingResponseRoot(String),

    #[error("unknown verb <{0}>")]
    UnknownVerb(String),

    #[error("<{parent}> does not permit a <{child}> child")]
    IllegalChild { parent: &'static str, child: String },

    #[error("<Dial> must contain exactly one of <Queue>, <Conference>, or a list of number-like targets, not both")]
    AmbiguousDialTarget,

    #[error("<Dial> had no target")]
    EmptyDialTarget,

    #[error("invalid value for attribute `{attr}` on <{verb}>: {value}")]
    InvalidAttribute {
        verb: &'static str,
        attr: &'static str,
        value: String,
    },

    #[error("text content was not valid utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, CallMlError>;
