//! Human-in-the-loop grounding curation.
//!
//! A caller hands over candidate longforms for an ambiguous shortform,
//! optionally seeded with prior groundings, names, and positive labels. The
//! seed is normalized into a consistent `CurationState`, an interactive
//! surface is started on it, and the session blocks until the human submits.
//! The submitted state is returned as the result.
//!
//! ```no_run
//! use grounding_curator::{CommandSurface, CurationRequest, Orchestrator, SystemBrowser};
//!
//! # fn run() -> Result<(), grounding_curator::SessionError> {
//! let request = CurationRequest {
//!     longforms: vec!["estrogen receptor".into(), "endoplasmic reticulum".into()],
//!     scores: vec![12.0, 7.5],
//!     ..Default::default()
//! };
//! let surface = CommandSurface::new("gcurate-surface");
//! let curated = Orchestrator::new(&surface, &SystemBrowser).ground(&request, false, 5000)?;
//! println!("{:?}", curated.grounding_map);
//! # Ok(())
//! # }
//! ```
pub mod browser;
pub mod config;
pub mod download;
pub mod model;
pub mod normalize;
pub mod session;
pub mod surface;
pub mod util;

pub use browser::{Browser, NoBrowser, SystemBrowser};
pub use model::{CurationRequest, CurationState, Grounding, GroundingMap, NamesMap};
pub use normalize::{normalize, ValidationError};
pub use session::{CancelToken, Orchestrator, SessionError, SessionOptions};
pub use surface::{CommandSurface, Surface, SurfaceSpec, Worker};
