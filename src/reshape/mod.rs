//! Time-basis construction and wide-to-long data reshaping.

pub mod basis;
pub mod long;

pub use basis::{parse_time_expression, ExprComponent, TimeBasisPlan, TimeForm};
pub use long::{reshape_long, CovariateColumn, LongTable};
