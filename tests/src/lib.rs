#[cfg(test)]
mod test_env;

#[cfg(test)]
mod test_request_handler_ddl;
#[cfg(test)]
mod test_request_handler_dml;
#[cfg(test)]
mod test_request_handler_dql;
#[cfg(test)]
mod test_request_handler_rest;
#[cfg(test)]
mod test_request_handler_um;
#[cfg(test)]
mod test_storage_reload;
