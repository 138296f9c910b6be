//! Error catalog for the result harvester.
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                          |
//! |------------|-------------|--------------------------------------|
//! | E001-E099  | Config      | Configuration and credentials        |
//! | E100-E199  | Runner      | Remote test-runner communication     |
//! | E200-E299  | Results     | Result parsing and reconciliation    |
//! | E300-E399  | Reporting   | Downstream submission                |
//! | E400-E499  | Internal    | Store and unexpected internal errors |

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};
