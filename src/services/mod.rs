pub mod lockout;
pub use lockout::{FailureOutcome, LockStatus, LockoutPolicy, LockoutState};

pub mod secrets;
pub use secrets::{SecretCipher, SecretVerifier};

pub mod audit_service;
pub mod audit_service_impl;
pub use audit_service::{
    AuditRecord, AuditRecorder, AuditedResource, ResourceRef, audit_created, audit_deleted,
    audit_updated,
};
pub use audit_service_impl::SeaOrmAuditRecorder;

pub mod session_security;
pub use session_security::{SessionError, SessionSecurity, SessionSecurityManager};

pub mod auth_chain;
pub mod auth_service;
pub mod auth_service_impl;
pub use auth_chain::{AuthComponents, AuthStrategy, AuthenticationChain};
pub use auth_service::{AuthError, AuthService, LoginAttempt, LoginOutcome, PublicReason};
pub use auth_service_impl::SeaOrmAuthService;

pub mod account_service;
pub mod account_service_impl;
pub use account_service::{AccountError, AccountService, NewAccount, SecondFactorEnrollment};
pub use account_service_impl::SeaOrmAccountService;

pub mod center_gate;
pub mod center_gate_impl;
pub use center_gate::{
    AccessError, Actor, CenterAccessGate, NewCenter, UnitScoped, ensure_access, filter_scoped,
};
pub use center_gate_impl::SeaOrmCenterGate;

pub mod pipeline;
pub use pipeline::{PipelineRejection, PipelineState, RequestPipeline, RequestStage};
