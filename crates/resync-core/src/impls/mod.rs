//! Impls - port implementations.
//!
//! # Production
//! - **FileBackend**: JSON document on disk
//! - **HttpGenerationService**: Generative Language REST API
//! - **EnvCredentials**: API keys from the environment
//! - **TcpProbe**: reachability signal source
//!
//! # Tests / simulation
//! - **MemoryBackend**
//! - **ScriptedService**

pub mod env_credentials;
pub mod file_backend;
pub mod http_service;
pub mod memory_backend;
pub mod probe;
pub mod scripted_service;

pub use self::env_credentials::EnvCredentials;
pub use self::file_backend::FileBackend;
pub use self::http_service::HttpGenerationService;
pub use self::memory_backend::MemoryBackend;
pub use self::probe::TcpProbe;
pub use self::scripted_service::ScriptedService;
