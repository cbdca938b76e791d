pub mod builder;
pub mod bundle;
pub mod deb;
pub mod error;
pub mod layout;
pub mod macho;
pub mod session;

pub use builder::Injector;
pub use bundle::TargetApp;
pub use error::Error;
pub use layout::InjectableArtifact;
pub use session::{ArtifactOutcome, ArtifactStatus, InjectionReport, InputKind, InputReference};

pub type Result<T> = std::result::Result<T, Error>;
