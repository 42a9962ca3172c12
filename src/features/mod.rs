//! Features that wait on asynchronous backend jobs.
//!
//! Each one configures the shared [`crate::poller`] loop with its own check
//! endpoint, attempt budget and re-trigger policy.

pub mod gallery;
pub mod podcast;
pub mod presentation;

pub use gallery::{Gallery, GalleryData, GalleryImage, GalleryLoad, GalleryStart, GalleryTable};
pub use podcast::{Dialogue, DialogueItem, Podcast, PodcastFeature, PodcastRequest, PromptModifiers, ReadyPodcast};
pub use presentation::{DownloadedPresentation, PresentationDownload};
