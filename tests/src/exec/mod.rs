mod interrupt;
mod stack;
