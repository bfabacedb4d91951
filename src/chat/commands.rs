// REPL command surface
//
// A line starting with one of the prefix symbols selects an action; any
// other line is sent as text. `/` introduces named commands with
// positional arguments.

use crate::chat::error::ChatError;
use crate::chat::session::ChatClient;

pub const TEXT_SYMBOL: char = '$';
pub const FILE_SYMBOL: char = '!';
pub const GROUP_SYMBOL: char = '@';
pub const USER_SYMBOL: char = '#';
pub const COMMAND_SYMBOL: char = '/';

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Text(String),
    File(String),
    SetUserDestination(String),
    SetGroupDestination(String),
    CreateGroup(String),
    DeleteGroup(String),
    InviteUser { user: String, group: String },
    KickUser { user: String, group: String },
    Leave(String),
    ListUsers(String),
    ListGroups,
    Logout,
    Exit,
    Help,
    /// A `/` line that matched no command, or matched with the wrong
    /// argument count; carries the message to print.
    Invalid(String),
}

const USAGE: &[&str] = &[
    "$<text-message>\n\tSend given message to the current destinatary",
    "!<path-to-file>\n\tSend given file to the current destinatary",
    "#<user-name>\n\tSet given user as the current destinatary",
    "@<group-name>\n\tSet given group as the current destinatary",
    "/create-group <group-name>\n\tCreate a chat group and join it",
    "/delete-group <group-name>\n\tDelete an existing chat group",
    "/invite-user <user-name> <group-name>\n\tInvite user to join the given group",
    "/kick-user <user-name> <group-name>\n\tRemove user from the given group",
    "/leave <group-name>\n\tLeave the given group",
    "/list-users <group-name>\n\tList the users participating in the given group",
    "/list-groups\n\tList the groups you are participating in",
    "/logout\n\tDisconnect yourself from the session",
    "/exit\n\tClose the chat connection",
    "/help\n\tShow this list",
];

/// Parse a non-empty, trimmed input line.
pub fn parse(line: &str) -> Command {
    let mut chars = line.chars();
    let symbol = chars.next().unwrap_or(TEXT_SYMBOL);
    let rest = chars.as_str().trim();

    match symbol {
        TEXT_SYMBOL => Command::Text(rest.to_string()),
        FILE_SYMBOL => Command::File(rest.to_string()),
        USER_SYMBOL => Command::SetUserDestination(first_word(rest)),
        GROUP_SYMBOL => Command::SetGroupDestination(first_word(rest)),
        COMMAND_SYMBOL => parse_named(rest),
        _ => Command::Text(line.to_string()),
    }
}

fn first_word(s: &str) -> String {
    s.split_whitespace().next().unwrap_or_default().to_string()
}

fn parse_named(rest: &str) -> Command {
    let words: Vec<&str> = rest.split_whitespace().collect();
    let Some((&name, args)) = words.split_first() else {
        return Command::Invalid("\"\" is not a valid command".to_string());
    };

    let wrong_arity = |usage: &str| Command::Invalid(format!("Usage: /{usage}"));

    match name {
        "create-group" => match args {
            [group] => Command::CreateGroup(group.to_string()),
            _ => wrong_arity("create-group <group-name>"),
        },
        "delete-group" => match args {
            [group] => Command::DeleteGroup(group.to_string()),
            _ => wrong_arity("delete-group <group-name>"),
        },
        "invite-user" => match args {
            [user, group] => Command::InviteUser {
                user: user.to_string(),
                group: group.to_string(),
            },
            _ => wrong_arity("invite-user <user-name> <group-name>"),
        },
        "kick-user" => match args {
            [user, group] => Command::KickUser {
                user: user.to_string(),
                group: group.to_string(),
            },
            _ => wrong_arity("kick-user <user-name> <group-name>"),
        },
        "leave" => match args {
            [group] => Command::Leave(group.to_string()),
            _ => wrong_arity("leave <group-name>"),
        },
        "list-users" => match args {
            [group] => Command::ListUsers(group.to_string()),
            _ => wrong_arity("list-users <group-name>"),
        },
        "list-groups" => Command::ListGroups,
        "logout" => Command::Logout,
        "exit" => Command::Exit,
        "help" => Command::Help,
        other => Command::Invalid(format!("\"{other}\" is not a valid command")),
    }
}

/// Run one command against the client. Returns `false` when the REPL
/// should stop.
pub async fn execute(client: &ChatClient, command: Command) -> bool {
    match command {
        Command::Text(text) => report(client.send_text(&text).await),
        Command::File(path) => report(client.send_file(&path).await),
        Command::SetUserDestination(user) => report(client.set_destination(&user, false).await),
        Command::SetGroupDestination(group) => report(client.set_destination(&group, true).await),
        Command::CreateGroup(group) => report(client.create_group(&group).await),
        Command::DeleteGroup(group) => report(client.delete_group(&group).await),
        Command::InviteUser { user, group } => report(client.add_member(&user, &group).await),
        Command::KickUser { user, group } => report(client.remove_member(&user, &group).await),
        Command::Leave(group) => report(client.leave_group(&group).await),
        Command::ListUsers(group) => match client.directory().list_group_members(&group).await {
            Ok(members) => {
                println!("{GROUP_SYMBOL}{group} user count: {}", members.len());
                if !members.is_empty() {
                    let line: Vec<String> =
                        members.iter().map(|m| format!("{USER_SYMBOL}{m}")).collect();
                    println!("{}", line.join(" "));
                }
            }
            Err(e) => eprintln!("{e}"),
        },
        Command::ListGroups => {
            let me = client.user_name();
            match client.directory().list_user_groups(&me).await {
                Ok(groups) => {
                    println!("{USER_SYMBOL}{me} group count: {}", groups.len());
                    if !groups.is_empty() {
                        let line: Vec<String> =
                            groups.iter().map(|g| format!("{GROUP_SYMBOL}{g}")).collect();
                        println!("{}", line.join(" "));
                    }
                }
                Err(e) => eprintln!("{e}"),
            }
        }
        Command::Logout => report(client.logout().await),
        Command::Exit => return false,
        Command::Help => {
            for usage in USAGE {
                println!("{usage}");
            }
        }
        Command::Invalid(message) => eprintln!("{message}"),
    }
    true
}

fn report(result: Result<(), ChatError>) {
    if let Err(e) = result {
        eprintln!("{e}");
    }
}
