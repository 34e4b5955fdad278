pub mod conflict;
pub mod debounce;
pub mod detector;
pub mod engine;
pub mod events;
pub mod file_state;
pub mod scanner;
pub mod session;
pub mod snapshot;

pub use conflict::{ConflictInfo, ConflictResolution, ConflictResolver, Detection};
pub use debounce::DebounceScheduler;
pub use detector::ChangeDetector;
pub use engine::{Collaborators, SyncConfig, SyncEngine, SyncReport};
pub use events::{EventStream, EventSubscription, SyncEvent};
pub use file_state::FileState;
pub use scanner::{FileScanner, ScanConfig};
pub use session::{RootState, SessionPhase, SyncRoot};
pub use snapshot::{FileSnapshot, SnapshotSet};
