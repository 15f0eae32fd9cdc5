//! Domain types for the structure decision core.

pub mod account;
pub mod bar;
pub mod decision;
pub mod ids;
pub mod session;
pub mod structure;

pub use account::{AccountState, OpenPosition, SymbolSpec};
pub use bar::{Bar, BarError, Timeframe};
pub use decision::{Decision, DecisionMetadata, ExitMethod};
pub use ids::{ConfigHash, StructureId};
pub use session::{InstrumentClass, Session, SessionContext};
pub use structure::{LifecycleState, Side, Structure, StructureKind};

/// Symbol type alias
pub type Symbol = String;
