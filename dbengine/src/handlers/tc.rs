use common::err::error_code::ErrorCode;
use common::err::CResult;
use common::io::OutputStream;

use crate::handlers::RequestHandler;
use crate::protocol::DatabaseEngineResponse;

impl<O: OutputStream> RequestHandler<O> {
    /// 核心按行自动提交，多语句事务协议未实现：
    /// BEGIN/COMMIT/ROLLBACK/SAVEPOINT/RELEASE统一回"未实现"哨兵。
    pub(crate) fn execute_transaction_control_request(
        &mut self,
        response: &mut DatabaseEngineResponse,
    ) -> CResult<()> {
        self.send_status_message(
            response,
            ErrorCode::NotImplemented,
            "transactions are not implemented",
        )
    }
}
