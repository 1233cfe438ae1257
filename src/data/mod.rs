//! Data structures for time-course gene set analysis.

mod design;
mod expression;
mod gene_set;

pub use design::{DesignTable, Variable, VariableType};
pub use expression::ExpressionMatrix;
pub use gene_set::{GeneSet, GeneSetCollection};
