use common::err::CResult;
use common::io::JsonWriter;

/// REST状态字段名
pub const REST_STATUS_FIELD_NAME: &str = "status";

/// REST行数组字段名
pub const REST_ROWS_FIELD_NAME: &str = "rows";

const AFFECTED_ROW_COUNT_FIELD_NAME: &str = "affectedRowCount";

const TRIDS_FIELD_NAME: &str = "trids";

/// GET响应前导: `{"status":<code>,"rows":[`
pub fn write_get_json_prolog(status_code: u32, writer: &mut JsonWriter<'_>) -> CResult<()> {
    writer.write_object_begin()?;
    writer.write_field_name(REST_STATUS_FIELD_NAME)?;
    writer.write_u64_value(status_code as u64)?;
    writer.write_comma()?;
    writer.write_field_name(REST_ROWS_FIELD_NAME)?;
    writer.write_array_begin()
}

/// 修改类响应前导: `{"status":<code>,"affectedRowCount":<n>,"trids":[`
pub fn write_modification_json_prolog(
    status_code: u32,
    affected_row_count: u64,
    writer: &mut JsonWriter<'_>,
) -> CResult<()> {
    writer.write_object_begin()?;
    writer.write_field_name(REST_STATUS_FIELD_NAME)?;
    writer.write_u64_value(status_code as u64)?;
    writer.write_comma()?;
    writer.write_field_name(AFFECTED_ROW_COUNT_FIELD_NAME)?;
    writer.write_u64_value(affected_row_count)?;
    writer.write_comma()?;
    writer.write_field_name(TRIDS_FIELD_NAME)?;
    writer.write_array_begin()
}

/// 响应收尾: `]}`
pub fn write_json_epilog(writer: &mut JsonWriter<'_>) -> CResult<()> {
    writer.write_array_end()?;
    writer.write_object_end()
}
