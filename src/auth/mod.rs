// Authentication module
// Tier negotiation, credential persistence and token lifecycle

mod consent;
mod lifecycle;
mod negotiator;
mod refresh;
mod store;
mod types;

pub use consent::{build_auth_url, CallbackParams, LoopbackListener, PkceVerifier};
pub use lifecycle::TokenLifecycle;
pub use negotiator::AuthNegotiator;
pub use store::CredentialStore;
pub use types::{
    ApplicationIdentity, AuthTier, Handle, InteractionCallback, InteractionChoice, PromptReason,
    TokenResponse, UserCredential,
};
