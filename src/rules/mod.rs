//! Rule materialization
//!
//! A rule catalog is a directory of parameterized JSON definitions. A
//! [`RuleTemplate`] selects one definition and supplies its positional
//! arguments; [`RuleMaterializer`] substitutes them, parses the conditions and
//! resolves special values (account id, IP range files) into a
//! [`MaterializedRule`].
//!
//! - [`template`] - Rule templates and severities
//! - [`condition`] - Typed condition tree and special values
//! - [`ip_ranges`] - IP range file reader
//! - [`materialize`] - Argument substitution and materialization

pub mod condition;
pub mod ip_ranges;
pub mod materialize;
pub mod template;

pub use condition::{Condition, Operand, SpecialValue, IP_RANGES_FROM_ARGS};
pub use ip_ranges::{FsIpRangeReader, IpRangeReader};
pub use materialize::{
    read_definitions, substitute_arguments, CatalogMaterialization, MaterializedRule,
    RuleMaterializer,
};
pub use template::{RuleTemplate, Severity};
