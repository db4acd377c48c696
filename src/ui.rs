/// Terminal output helpers shared by the loop and the command layer.
use colored::Colorize;

use crate::conversation::Message;

/// `abcdef [role] -> abcdef` header line for a message.
pub fn message_header(msg: &Message) -> String {
    format!("{:.6} [{}] -> {:.6}", msg.sha1, msg.role, msg.parent_sha1)
        .bright_yellow()
        .to_string()
}

/// Header plus indented content, with the head marker when set.
pub fn print_message_block(msg: &Message) {
    let head = if msg.head { "Head" } else { "" };
    println!("{} {}", message_header(msg), head.bright_blue());
    for line in msg.content.lines() {
        println!("  {line}");
    }
    println!();
}

/// `user@profile> ` prompt.
pub fn prompt(user_name: &str, profile_name: &str) -> String {
    format!("{user_name}@{profile_name}> ")
}
