//! Immutable, value-comparable statement templates.

use std::fmt;
use std::sync::Arc;

use crate::backend::{Connection, PreparedOperation};
use crate::error::{Error, Result};
use crate::statement::value::{TypeTag, Value};

/// Where a parameter is bound within the statement text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// 1-based positional slot.
    Position(usize),
    /// Named slot, including its prefix (`:id`, `@id`, `$id`).
    Name(String),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position(p) => write!(f, "#{p}"),
            Self::Name(n) => f.write_str(n),
        }
    }
}

/// A single statement parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    value: Value,
    type_tag: Option<TypeTag>,
    locator: Locator,
}

impl Parameter {
    pub fn at(position: usize, value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            type_tag: None,
            locator: Locator::Position(position),
        }
    }

    pub fn named(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            type_tag: None,
            locator: Locator::Name(name.into()),
        }
    }

    /// Coerce the value to `tag` when the parameter is bound.
    #[must_use]
    pub fn of_type(mut self, tag: TypeTag) -> Self {
        self.type_tag = Some(tag);
        self
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn type_tag(&self) -> Option<TypeTag> {
        self.type_tag
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    fn bound_value(&self) -> Result<Value> {
        match self.type_tag {
            Some(tag) => self.value.coerce(tag),
            None => Ok(self.value.clone()),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.locator, self.value)?;
        if let Some(tag) = self.type_tag {
            write!(f, " as {tag}")?;
        }
        Ok(())
    }
}

/// Statement text plus its ordered parameters.
///
/// Two templates are interchangeable iff their text and parameters are
/// equal. Cloning is cheap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementTemplate {
    text: Arc<str>,
    parameters: Arc<[Parameter]>,
}

impl StatementTemplate {
    /// Build a template from explicit parameters.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Binding`] if the text is empty, if positional and
    /// named parameters are mixed, if a position is zero, or if a slot is
    /// bound twice.
    pub fn new(
        text: impl Into<String>,
        parameters: impl IntoIterator<Item = Parameter>,
    ) -> Result<Self> {
        let text: String = text.into();
        if text.trim().is_empty() {
            return Err(Error::binding("empty statement text"));
        }

        let parameters: Vec<Parameter> = parameters.into_iter().collect();
        let named = parameters
            .iter()
            .filter(|p| matches!(p.locator, Locator::Name(_)))
            .count();
        if named != 0 && named != parameters.len() {
            return Err(Error::binding(
                "named and positional parameters cannot be mixed",
            ));
        }
        for (i, param) in parameters.iter().enumerate() {
            if param.locator == Locator::Position(0) {
                return Err(Error::binding("parameter positions are 1-based"));
            }
            if parameters[..i].iter().any(|p| p.locator == param.locator) {
                return Err(Error::binding(format!(
                    "parameter {} bound more than once",
                    param.locator
                )));
            }
        }

        Ok(Self {
            text: text.into(),
            parameters: parameters.into(),
        })
    }

    /// A template without parameters.
    pub fn plain(text: impl Into<String>) -> Result<Self> {
        Self::new(text, [])
    }

    /// A template whose values bind to slots 1, 2, ... in order.
    pub fn positional<V: Into<Value>>(
        text: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        let parameters = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| Parameter::at(i + 1, v));
        Self::new(text, parameters)
    }

    /// A template with named parameters.
    pub fn named<N: Into<String>, V: Into<Value>>(
        text: impl Into<String>,
        values: impl IntoIterator<Item = (N, V)>,
    ) -> Result<Self> {
        let parameters = values.into_iter().map(|(n, v)| Parameter::named(n, v));
        Self::new(text, parameters)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn is_named(&self) -> bool {
        self.parameters
            .first()
            .is_some_and(|p| matches!(p.locator, Locator::Name(_)))
    }

    /// Prepare this template on `connection` and bind its parameters.
    ///
    /// Parameters are bound in registration order. If binding fails, the
    /// prepared operation is released before the error is returned.
    pub fn bind<'c, C: Connection>(&self, connection: &'c mut C) -> Result<C::Operation<'c>> {
        let mut operation = connection.prepare(&self.text)?;
        if let Err(err) = self.apply(&mut operation) {
            if let Err(release_err) = operation.release() {
                tracing::warn!(
                    error = %release_err,
                    "Suppressed release failure after binding error"
                );
            }
            return Err(err);
        }
        Ok(operation)
    }

    fn apply<O: PreparedOperation>(&self, operation: &mut O) -> Result<()> {
        let expected = operation.parameter_count();
        if expected != self.parameters.len() {
            return Err(Error::binding(format!(
                "statement expects {expected} parameter(s), template has {}",
                self.parameters.len()
            )));
        }

        for param in self.parameters.iter() {
            let index = match &param.locator {
                Locator::Position(p) if *p <= expected => *p,
                Locator::Position(p) => {
                    return Err(Error::binding(format!(
                        "parameter position {p} out of range (statement has {expected})"
                    )))
                }
                Locator::Name(name) => operation
                    .parameter_index(name)?
                    .ok_or_else(|| Error::binding(format!("unknown parameter name {name}")))?,
            };
            let value = param.bound_value()?;
            operation.bind(index, &value)?;
        }
        Ok(())
    }
}

impl fmt::Display for StatementTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatementTemplate [text={}", self.text)?;
        if !self.parameters.is_empty() {
            f.write_str(", parameters=[")?;
            for (i, param) in self.parameters.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{param}")?;
            }
            f.write_str("]")?;
        }
        f.write_str("]")
    }
}
