//! Intrinsic procedures exposed to wisp programs through the native
//! table. Source files reach them with `native fun` stubs.

pub mod io;
pub mod lists;
pub mod strings;
pub mod utils;

use crate::runtime::natives::NativeRegistry;

/// Register the full intrinsic set. Registration order fixes the native
/// ids, so this must run before lowering resolves call sites.
pub fn register_all(registry: &mut NativeRegistry) {
    // stdio
    registry.register("print", io::native_print);
    registry.register("prompt_int", io::native_prompt_int);
    registry.register("prompt_float", io::native_prompt_float);
    registry.register("readln", io::native_readln);

    // lists
    registry.register("len_of", lists::native_len_of);
    registry.register("list_push_back", lists::native_list_push_back);
    registry.register("list_pop_back", lists::native_list_pop_back);
    registry.register("list_pop_front", lists::native_list_pop_front);
    registry.register("list_concat", lists::native_list_concat);

    // strings
    registry.register("strlen", strings::native_strlen);
    registry.register("strcat", strings::native_strcat);
    registry.register("substr", strings::native_substr);

    // utils
    registry.register("stoi", utils::native_stoi);
    registry.register("stof", utils::native_stof);
    registry.register("get_argv", utils::native_get_argv);
}
