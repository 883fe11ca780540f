// CLI subcommand dispatch.

use clap::Subcommand;

use crate::connect::ConnectionArgs;

pub mod edit;
pub mod react;
pub mod say;
pub mod watch;
pub mod who;

#[derive(Subcommand)]
pub enum Command {
    /// Follow a document: content, chat and presence as they change
    Watch(watch::WatchArgs),
    /// Replace or append to a document's content
    Edit(edit::EditArgs),
    /// Post a chat message
    Say(say::SayArgs),
    /// Toggle an emoji reaction on a chat message
    React(react::ReactArgs),
    /// List the participants currently in a document
    Who(who::WhoArgs),
}

pub async fn run(cmd: Command, connection: ConnectionArgs) -> anyhow::Result<()> {
    match cmd {
        Command::Watch(args) => watch::run(args, &connection).await,
        Command::Edit(args) => edit::run(args, &connection).await,
        Command::Say(args) => say::run(args, &connection).await,
        Command::React(args) => react::run(args, &connection).await,
        Command::Who(args) => who::run(args, &connection).await,
    }
}
