mod async_write;
