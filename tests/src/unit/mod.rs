mod chat_tests;
mod session_store_tests;
