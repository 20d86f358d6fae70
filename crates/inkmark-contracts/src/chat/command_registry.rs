#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    /// Key the raw argument is stored under, if the command takes one.
    pub arg_key: Option<&'static str>,
}

const fn spec(
    command: &'static str,
    action: &'static str,
    arg_key: Option<&'static str>,
) -> CommandSpec {
    CommandSpec {
        command,
        action,
        arg_key,
    }
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    spec("image_model", "set_image_model", Some("model")),
    spec("vision_model", "set_vision_model", Some("model")),
    spec("global", "set_global", Some("text")),
    spec("switch", "switch_session", Some("target")),
    spec("delete", "delete_session", Some("target")),
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    spec("overlay", "load_overlay", Some("path")),
    spec("save", "save_image", Some("path")),
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    spec("new", "new_session", None),
    spec("sessions", "list_sessions", None),
    spec("status", "status", None),
    spec("edit", "edit", None),
    spec("clear_overlay", "clear_overlay", None),
    spec("help", "help", None),
    spec("quit", "quit", None),
    spec("exit", "quit", None),
];

pub(crate) const REGION_COMMAND: &str = "region";
pub(crate) const DRAW_COMMAND: &str = "draw";

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/new",
    "/sessions",
    "/switch <n|id>",
    "/delete [n|id]",
    "/global <text>",
    "/region <color> <text>",
    "/overlay <png>",
    "/draw <color> <radius> <x,y>...",
    "/clear_overlay",
    "/edit",
    "/save <path>",
    "/status",
    "/image_model <model>",
    "/vision_model <model>",
    "/help",
    "/quit",
];
