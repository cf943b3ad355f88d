//! RDF terms.
//!
//! A [`Term`] is an immutable RDF value. Equality and hashing are structural:
//! two literals are equal only if lexical form, language tag, and datatype all
//! match exactly. No value-space normalization happens at this layer.

use std::fmt;

/// XSD datatype URIs recognised by the inline encoder.
pub mod xsd {
    /// XML Schema namespace.
    pub const NS: &str = "http://www.w3.org/2001/XMLSchema#";
    /// `xsd:integer`.
    pub const INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    /// `xsd:decimal`.
    pub const DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
    /// `xsd:boolean`.
    pub const BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
    /// `xsd:date`.
    pub const DATE: &str = "http://www.w3.org/2001/XMLSchema#date";
    /// `xsd:dateTime`.
    pub const DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";
    /// `xsd:string`.
    pub const STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
}

/// An RDF literal: lexical form plus optional language tag and datatype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Literal {
    lexical: String,
    language: Option<String>,
    datatype: Option<String>,
}

impl Literal {
    /// Creates a literal from its parts.
    pub fn new(
        lexical: impl Into<String>,
        language: Option<String>,
        datatype: Option<String>,
    ) -> Self {
        Self { lexical: lexical.into(), language, datatype }
    }

    /// Returns the lexical form.
    pub fn lexical(&self) -> &str {
        &self.lexical
    }

    /// Returns the language tag, if any.
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Returns the datatype URI, if any.
    pub fn datatype(&self) -> Option<&str> {
        self.datatype.as_deref()
    }

    /// Returns true if this literal carries exactly the given datatype and no language tag.
    pub fn is_typed_as(&self, datatype: &str) -> bool {
        self.language.is_none() && self.datatype.as_deref() == Some(datatype)
    }
}

/// An RDF term.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    /// A URI reference.
    Uri(String),
    /// A blank node with an opaque label.
    Blank(String),
    /// A literal.
    Literal(Literal),
    /// A query variable.
    Variable(String),
    /// The wildcard matching any term.
    Any,
}

impl Term {
    /// Creates a URI term.
    pub fn uri(uri: impl Into<String>) -> Self {
        Self::Uri(uri.into())
    }

    /// Creates a blank node term.
    pub fn blank(label: impl Into<String>) -> Self {
        Self::Blank(label.into())
    }

    /// Creates a variable term.
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// Creates a plain literal with no language tag or datatype.
    pub fn plain(lexical: impl Into<String>) -> Self {
        Self::Literal(Literal::new(lexical, None, None))
    }

    /// Creates a language-tagged literal.
    pub fn lang(lexical: impl Into<String>, language: impl Into<String>) -> Self {
        Self::Literal(Literal::new(lexical, Some(language.into()), None))
    }

    /// Creates a typed literal.
    pub fn typed(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self::Literal(Literal::new(lexical, None, Some(datatype.into())))
    }

    /// Creates an `xsd:integer` literal.
    pub fn integer(value: i64) -> Self {
        Self::typed(value.to_string(), xsd::INTEGER)
    }

    /// Creates an `xsd:boolean` literal.
    pub fn boolean(value: bool) -> Self {
        Self::typed(if value { "true" } else { "false" }, xsd::BOOLEAN)
    }

    /// Returns the literal if this term is one.
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Self::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    /// Returns true for [`Term::Any`].
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uri(uri) => write!(f, "<{uri}>"),
            Self::Blank(label) => write!(f, "_:{label}"),
            Self::Literal(lit) => {
                write!(f, "\"{}\"", lit.lexical.escape_default())?;
                if let Some(lang) = &lit.language {
                    write!(f, "@{lang}")?;
                }
                if let Some(dt) = &lit.datatype {
                    write!(f, "^^<{dt}>")?;
                }
                Ok(())
            },
            Self::Variable(name) => write!(f, "?{name}"),
            Self::Any => f.write_str("ANY"),
        }
    }
}
