pub mod books;
pub mod trades;
pub mod users;

use bookswap_kernel::ModuleRegistry;

use crate::context::AppContext;

/// Register all application modules with the registry
pub fn register_all(registry: &mut ModuleRegistry, ctx: &AppContext) {
    registry.register(users::create_module(ctx));
    registry.register(books::create_module(ctx));
    registry.register(trades::create_module(ctx));
}
