// Models module - workspaces, environments, HTTP requests, flows and responses

pub mod environment;
pub mod enums;
pub mod flow;
pub mod http;
pub mod response;
pub mod workspace;

pub use enums::{BodyKind, ContentKind, KeyValueKind, Role};
pub use environment::{Environment, Variable};
pub use flow::{
    Edge, EdgeHandle, ErrorPolicy, Flow, FlowRunStatus, FlowVariable, Node, NodeConfig,
    NodeExecution, NodeKind, NodeStatus, Position,
};
pub use http::{DeltaChild, Http, HttpAssert, HttpBodyRaw, HttpKeyValue, HttpVersion};
pub use response::{HttpResponse, HttpResponseAssert, HttpResponseHeader};
pub use workspace::{FileEntry, Workspace, WorkspaceMember};
