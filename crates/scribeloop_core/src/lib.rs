pub mod domain;
pub mod highlight;
pub mod markdown;
pub mod offsets;
pub mod ports;
pub mod sidecar;
pub mod thread;
pub mod tree;

pub use domain::{
    Annotation, AnnotationRecord, Chapter, ChapterStatus, ChapterUpdate, MetadataUpdate,
    NewAnnotation, NewChapter, NewReply, ProgressSummary, ProjectMetadata, Reader,
    ReaderCredentials, SelectionOffsets, ANONYMOUS_AUTHOR,
};
pub use highlight::{apply_highlights, Highlights};
pub use offsets::{selection_offsets, TextPoint, TextRange};
pub use ports::{DatabaseService, PortError, PortResult};
pub use sidecar::{Draft, Effect, Sidecar, Submission};
pub use thread::{
    assemble_thread, assemble_threads, cascade_scope, depth_of, AnnotationThread, MAX_THREAD_DEPTH,
};
pub use tree::{ContentTree, Fragment, NodeId, TextTree};
