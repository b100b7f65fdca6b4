pub mod assembler;
pub mod auth;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod render;
pub mod session;
pub mod sse;
pub mod telemetry;
pub mod transport;


pub use assembler::{
    ChatStreamObserver, CompletedResponse, StreamCallbacks, StreamState, StreamingChatAssembler,
};
pub use auth::{AuthCoordinator, AuthEvent};
pub use client::LegalApiClient;
pub use config::{ApiSettings, ConfigError, Endpoints};
pub use credentials::{Credentials, MemoryTokenStore, PersistedTokenStore, TokenStore};
pub use error::{ApiFailure, ApiResult, FailureKind};
pub use executor::{RequestContext, RequestExecutor};
pub use session::{ChatSession, ChatSessions, ConversationType};
pub use sse::{ResponseKind, StreamEvent, StreamMetadata};
pub use transport::{ApiTransport, HttpMethod, ReqwestTransport, ScriptedReply, ScriptedTransport};
