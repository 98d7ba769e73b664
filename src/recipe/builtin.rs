// src/recipe/builtin.rs

//! Recipe catalogues compiled into the binary

/// `(origin, content)` pairs, loaded in this order
pub const CATALOGUES: &[(&str, &str)] = &[
    (
        "builtin:templates.toml",
        include_str!("../../recipes/templates.toml"),
    ),
    (
        "builtin:toolchain.toml",
        include_str!("../../recipes/toolchain.toml"),
    ),
    (
        "builtin:libraries.toml",
        include_str!("../../recipes/libraries.toml"),
    ),
    ("builtin:python.toml", include_str!("../../recipes/python.toml")),
    ("builtin:gui.toml", include_str!("../../recipes/gui.toml")),
];
