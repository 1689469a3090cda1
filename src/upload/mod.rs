// Resumable video upload
// Task and metadata model plus the chunked session driving it

mod session;
mod task;

pub use session::{ProgressCallback, UploadController, UploadProgress, UploadSession};
pub use task::{
    Privacy, UploadState, UploadTask, VideoMetadata, DEFAULT_CATEGORY_ID, MAX_DESCRIPTION_CHARS,
    MAX_TAGS, MAX_TITLE_CHARS, SHORTS_CATEGORY_ID,
};
