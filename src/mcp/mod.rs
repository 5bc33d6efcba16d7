//! MCP (Model Context Protocol) dispatch: the JSON-RPC surface external
//! agent hosts speak to the bridge.

pub mod dispatcher;
pub mod methods;
pub mod result;
pub mod session;
pub mod wire;

pub use dispatcher::Dispatcher;
pub use session::{McpSession, McpSessionTable};
