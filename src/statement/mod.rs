//! Statement templates and the values bound into them.

pub mod template;
pub mod value;

pub use template::{Locator, Parameter, StatementTemplate};
pub use value::{FromValue, TypeTag, Value};
