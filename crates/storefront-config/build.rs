fn main() {
    // option_env!() values are cached by cargo unless it is told to watch them.
    println!("cargo:rerun-if-env-changed=STOREFRONT_DEFAULT_API_URL");
}
