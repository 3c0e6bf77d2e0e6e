pub mod http;
pub mod mock;

pub use http::{
    ForwardError, HttpCaller, HttpResponse, OutboundRequest, ReqwestCaller, RequestBody,
};
pub use mock::RecordingCaller;
