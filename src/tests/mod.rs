mod integration_tests;
mod ring_buffer_tests;
