//! Text-level processing of model-generated source code.
//!
//! | Module     | Purpose                                                  |
//! |------------|----------------------------------------------------------|
//! | `lexer`    | Lossless token stream (strings, templates, comments, blocks) |
//! | `blocks`   | Split and join `--- FILE: path ---` multi-file blobs      |
//! | `sanitize` | Idempotent repairs applied before code is stored          |
//! | `balance`  | Close unbalanced quotes and template delimiters           |
//! | `extract`  | Find a component's primary return expression              |
//! | `jsx`      | Project JSX to inert static HTML                          |
//! | `modules`  | Strip module syntax so files can share one unit           |

pub mod balance;
pub mod blocks;
pub mod extract;
pub mod jsx;
pub mod lexer;
pub mod modules;
pub mod sanitize;

pub use blocks::{FileArtifact, split_files, split_normalized};
pub use sanitize::{sanitize_code, sanitize_files};
