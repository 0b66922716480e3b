mod server_e2e;
