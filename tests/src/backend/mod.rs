mod code_buffer;
mod emitter;
