//! Seed-rooted gapped alignment: X-drop extension, probabilistic scoring,
//! translated frames, and bidirectional assembly.

pub mod assembler;
pub mod centroid;
pub mod frame;
pub mod segment;
pub mod xdrop;

pub use assembler::{Aligners, Alignment, AlignmentExtras, ExtensionParams};
pub use centroid::Centroid;
pub use frame::{translate_3frame, FrameshiftXdropAligner};
pub use segment::SegmentPair;
pub use xdrop::GappedXdropAligner;
