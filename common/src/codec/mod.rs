pub mod coded_stream;
pub mod varint;

pub use coded_stream::{CodedInputStream, CodedOutputStream};
pub use varint::{
    read_var_u32, read_var_u64, var_u32_size, var_u64_size, write_var_u32, write_var_u64,
    zigzag_decode64, zigzag_encode64, MAX_VAR_U32_SIZE, MAX_VAR_U64_SIZE,
};
