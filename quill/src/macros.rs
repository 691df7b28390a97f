/// Creates a single chat [`Message`](crate::Message) from a role shorthand.
///
/// ```rust
/// use quill::{Role, quill_msg};
///
/// let message = quill_msg!(assistant => "Done.");
/// assert_eq!(message.role, Role::Assistant);
/// assert_eq!(message.content, "Done.");
/// ```
#[macro_export]
macro_rules! quill_msg {
    (system => $content:expr $(,)?) => {
        $crate::Message::new($crate::Role::System, $content)
    };
    (user => $content:expr $(,)?) => {
        $crate::Message::new($crate::Role::User, $content)
    };
    (assistant => $content:expr $(,)?) => {
        $crate::Message::new($crate::Role::Assistant, $content)
    };
    (tool => $content:expr $(,)?) => {
        $crate::Message::new($crate::Role::Tool, $content)
    };
    ($role:ident => $content:expr $(,)?) => {
        compile_error!("unsupported role: use system, user, assistant, or tool");
    };
}

/// Creates a `Vec<Message>` history from role/content pairs.
///
/// ```rust
/// use quill::{Role, quill_history};
///
/// let history = quill_history![
///     system => "You are concise.",
///     user => "What changed in this diff?",
/// ];
///
/// assert_eq!(history.len(), 2);
/// assert_eq!(history[1].role, Role::User);
/// ```
#[macro_export]
macro_rules! quill_history {
    () => {
        Vec::<$crate::Message>::new()
    };
    ($($role:ident => $content:expr),+ $(,)?) => {
        vec![$($crate::quill_msg!($role => $content)),+]
    };
}
