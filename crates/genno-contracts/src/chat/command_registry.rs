#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose whole remainder is one free-text argument.
pub(crate) const TEXT_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "concept",
        action: "set_concept",
    },
    CommandSpec {
        command: "theme",
        action: "set_theme",
    },
    CommandSpec {
        command: "custom_theme",
        action: "set_custom_theme",
    },
    CommandSpec {
        command: "style",
        action: "set_style",
    },
    CommandSpec {
        command: "extra",
        action: "set_extra",
    },
    CommandSpec {
        command: "ratio",
        action: "set_ratio",
    },
    CommandSpec {
        command: "revise",
        action: "revise",
    },
    CommandSpec {
        command: "image_model",
        action: "set_image_model",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "remove",
        action: "remove_image",
    },
    CommandSpec {
        command: "download",
        action: "download",
    },
];

pub(crate) const MULTI_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "pet",
        action: "add_pet_images",
    },
    CommandSpec {
        command: "owner",
        action: "add_owner_images",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "generate",
        action: "generate",
    },
    CommandSpec {
        command: "back",
        action: "history_back",
    },
    CommandSpec {
        command: "forward",
        action: "history_forward",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "wait",
        action: "wait_validations",
    },
    CommandSpec {
        command: "themes",
        action: "list_themes",
    },
    CommandSpec {
        command: "prompt",
        action: "show_prompt",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
];

pub const STUDIO_HELP_COMMANDS: &[&str] = &[
    "/pet",
    "/owner",
    "/remove",
    "/wait",
    "/concept",
    "/theme",
    "/custom_theme",
    "/style",
    "/extra",
    "/ratio",
    "/image_model",
    "/prompt",
    "/generate",
    "/revise",
    "/back",
    "/forward",
    "/download",
    "/status",
    "/themes",
    "/reset",
    "/help",
];
