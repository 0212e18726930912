pub mod response;
pub mod session;
pub mod settings;
pub mod trial;

pub use response::{ButtonKind, InputEvent, InputSource, NoInput};
pub use session::{DisplaySurface, RunOutcome, RunReport, Session, TrialLoader};
pub use settings::{CoreSettings, Settings};
pub use trial::{FrameInfo, Markers, NoDraw, Trial, TrialBehavior};
