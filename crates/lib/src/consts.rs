/// Suffix identifying an image definition file.
pub const DOCKERFILE_SUFFIX: &str = "Dockerfile";

/// Name of the per-directory ignore file.
pub const DOCKERIGNORE: &str = ".dockerignore";

/// Label carrying the image short name. Required.
pub const LABEL_NAME: &str = "name";

/// Label excluding an image from the graph when set to `"true"`.
pub const LABEL_SKIP_BUILD: &str = "skipbuild";

/// Comma separated list of tags published alongside the hash on release.
pub const LABEL_EXTRA_TAGS: &str = "imgtree.extra-tags";

/// Opt-in to the custom humanized hash word list.
pub const LABEL_USE_CUSTOM_HASH_LIST: &str = "imgtree.use-custom-hash-list";

/// Number of words in a humanized hash.
pub const HUMANIZED_HASH_WORDS: usize = 4;

/// Prefix of the transient tag used until an image has been promoted.
pub const DEV_TAG_PREFIX: &str = "dev-";

/// Tag used in definition files to reference managed parent images.
pub const DEFAULT_PLACEHOLDER_TAG: &str = "latest";
