mod helpers;

mod tests_basic;
mod tests_keys;
mod tests_padding;
