pub mod buffered_chunked_output_stream;
pub mod chunked_input_stream;
pub mod error_checker;
pub mod file_stream;
pub mod json_writer;
pub mod limited_input_stream;
pub mod memory_stream;
pub mod stream;

pub use buffered_chunked_output_stream::BufferedChunkedOutputStream;
pub use chunked_input_stream::ChunkedInputStream;
pub use error_checker::{
    DefaultErrorCodeChecker, ErrorCodeChecker, ExitSignalAwareErrorCodeChecker,
};
pub use file_stream::FileStream;
pub use json_writer::JsonWriter;
pub use limited_input_stream::LimitedInputStream;
pub use memory_stream::{
    DynamicMemoryOutputStream, MemoryInputStream, SharedMemoryOutputStream, SliceInputStream,
};
pub use stream::{InputStream, IoBase, OutputStream};
