mod time;
mod uploads;

pub use time::{format_local, now_local};
pub use uploads::{StoredUpload, UploadStore};
