use snafu::{OptionExt as _, Snafu};

use super::Action;
use crate::model::Record;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ParseError {
    #[snafu(display("unknown command `{command}`, try `help`"))]
    UnknownCommand { command: String },

    #[snafu(display("`{command}` needs {argument}"))]
    MissingArgument {
        command: &'static str,
        argument: &'static str,
    },

    #[snafu(display("`{command}` expects {expected}, got `{input}`"))]
    InvalidArgument {
        command: &'static str,
        expected: &'static str,
        input: String,
    },
}

pub fn parse(input: &str) -> Result<Action, ParseError> {
    let (command, rest) = split_word(input.trim());

    let action = match command {
        "" => Action::None,
        "help" => Action::Help,
        "feed" | "home" => Action::Feed {
            category: Some(rest).filter(|rest| !rest.is_empty()).map(str::to_string),
        },
        "shorts" => Action::Shorts,
        "channel" => Action::Channel {
            owner: record("channel", "a channel id", rest)?,
        },
        "related" => Action::Related {
            video_id: record("related", "a video id", rest)?,
        },
        "more" => Action::More,
        "open" | "watch" => Action::Open {
            video_id: record("open", "a video id", rest)?,
        },
        "like" => Action::Like {
            video_id: record("like", "a video id", rest)?,
        },
        "comments" => Action::Comments {
            video_id: record("comments", "a video id", rest)?,
        },
        "comment" => {
            let (video_id, body) = split_word(rest);
            Action::Comment {
                video_id: record("comment", "a video id", video_id)?,
                body: text("comment", body)?,
            }
        }
        "reply" => {
            let (video_id, rest) = split_word(rest);
            let (parent_id, body) = split_word(rest);
            Action::Reply {
                video_id: record("reply", "a video id", video_id)?,
                parent_id: record("reply", "the id of the comment to reply to", parent_id)?,
                body: text("reply", body)?,
            }
        }
        "later" | "save" => Action::SaveForLater {
            video_id: record("later", "a video id", rest)?,
        },
        "unsave" => Action::RemoveFromWatchLater {
            video_id: record("unsave", "a video id", rest)?,
        },
        "history" => Action::History,
        "liked" => Action::Liked,
        "watchlater" => Action::WatchLater,
        "mute" => Action::Mute {
            muted: match rest {
                "" | "on" => true,
                "off" => false,
                other => {
                    return InvalidArgumentSnafu {
                        command: "mute",
                        expected: "`on` or `off`",
                        input: other,
                    }
                    .fail()
                }
            },
        },
        "exit" | "quit" => Action::Exit,
        other => return UnknownCommandSnafu { command: other }.fail(),
    };

    Ok(action)
}

fn split_word(input: &str) -> (&str, &str) {
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    }
}

fn record<T>(
    command: &'static str, argument: &'static str, input: &str,
) -> Result<Record<T>, ParseError> {
    let id = Some(input)
        .filter(|id| !id.is_empty())
        .context(MissingArgumentSnafu { command, argument })?;

    if id.chars().any(char::is_whitespace) {
        return InvalidArgumentSnafu {
            command,
            expected: argument,
            input: id,
        }
        .fail();
    }

    Ok(Record::new(id))
}

fn text(command: &'static str, input: &str) -> Result<String, ParseError> {
    Some(input)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .context(MissingArgumentSnafu {
            command,
            argument: "some text",
        })
}
