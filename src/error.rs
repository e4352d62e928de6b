use thiserror::Error;

use crate::ir::{BasicBlockTag, ValueTag};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// Transforms in this crate never fail for "business" reasons: a well-formed flow graph always
/// produces a well-formed flow graph. The variants below therefore describe invariant violations
/// found by [`crate::ir::FlowGraph::validate`], failed lookups, and failures reported by the
/// collaborator that supplies callee bodies to the inliner.
///
/// # Error Categories
///
/// ## IR Errors
/// - [`Error::Malformed`] - A flow graph violates an SSA or structural invariant
/// - [`Error::UnknownValue`] - A value tag is not defined in the graph
/// - [`Error::UnknownBlock`] - A block tag is not defined in the graph
///
/// ## Collaborator Errors
/// - [`Error::BodyProvider`] - The method body provider failed to produce a body
///
/// # Examples
///
/// ```rust
/// use flowscope::{Error, ir::FlowGraphBuilder};
///
/// let graph = FlowGraphBuilder::new().to_immutable();
/// match graph.validate() {
///     Ok(()) => println!("graph is well-formed"),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed graph: {} ({}:{})", message, file, line);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The flow graph violates one of its structural or SSA invariants.
    ///
    /// This error indicates a use without a dominating definition, a branch whose argument
    /// count does not match its target's parameter list, a try placeholder on a non-try branch,
    /// or a dangling block reference. The error includes the source location where the
    /// violation was detected for debugging purposes.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of the violated invariant
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A value tag was looked up that is not defined by any instruction or block parameter.
    #[error("Value is not defined in this graph - {0}")]
    UnknownValue(ValueTag),

    /// A block tag was looked up that does not name a block in the graph.
    #[error("Block is not defined in this graph - {0}")]
    UnknownBlock(BasicBlockTag),

    /// The method body provider failed while fetching a callee body.
    ///
    /// The inliner downgrades this error to a declined call site; it only surfaces when a
    /// caller drives a [`crate::compiler::BodyRequest`] directly.
    #[error("Body provider failed - {0}")]
    BodyProvider(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
