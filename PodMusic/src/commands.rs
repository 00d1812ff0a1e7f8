//! Console commands.

use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use podplayer::{
    EpisodeId, EpisodeStore, PlaybackSession, QueueStore, SessionSnapshot, SessionState,
};

pub const HELP: &str = "\
Commands:
  list              episodes in the library
  play <id>         load (or resume) an episode
  pause | toggle    transport control
  seek <secs>       jump to a position
  ff | rew          skip forward / backward
  queue             show the play queue
  add <id>          append to the queue
  next <id>         play next
  remove <id>       remove from the queue
  later <id>        move to the end of the queue
  move <from> <to>  reorder the queue
  played <id>       toggle the played flag
  status            current playback state
  quit";

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    List,
    Play(EpisodeId),
    Pause,
    Toggle,
    Seek(f64),
    Forward,
    Rewind,
    Queue,
    Add(EpisodeId),
    Next(EpisodeId),
    Remove(EpisodeId),
    Later(EpisodeId),
    Move { from: usize, to: usize },
    Played(EpisodeId),
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or_else(|| anyhow!("empty command"))?;

        let command = match name.to_lowercase().as_str() {
            "list" | "ls" => Command::List,
            "play" => Command::Play(episode_arg(&mut words, name)?),
            "pause" => Command::Pause,
            "toggle" => Command::Toggle,
            "ff" => Command::Forward,
            "rew" => Command::Rewind,
            "queue" | "q" => Command::Queue,
            "add" => Command::Add(episode_arg(&mut words, name)?),
            "next" => Command::Next(episode_arg(&mut words, name)?),
            "remove" | "rm" => Command::Remove(episode_arg(&mut words, name)?),
            "later" => Command::Later(episode_arg(&mut words, name)?),
            "played" => Command::Played(episode_arg(&mut words, name)?),
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "seek" => {
                let secs = words.next().ok_or_else(|| anyhow!("`seek` needs a position"))?;
                Command::Seek(secs.parse().with_context(|| format!("invalid position {secs}"))?)
            }
            "move" => Command::Move {
                from: index_arg(&mut words, "from")?,
                to: index_arg(&mut words, "to")?,
            },
            other => bail!("unknown command `{other}` (try `help`)"),
        };
        Ok(command)
    }
}

fn episode_arg<'a>(words: &mut impl Iterator<Item = &'a str>, name: &str) -> Result<EpisodeId> {
    words
        .next()
        .map(EpisodeId::from)
        .ok_or_else(|| anyhow!("`{name}` needs an episode id"))
}

fn index_arg<'a>(words: &mut impl Iterator<Item = &'a str>, label: &str) -> Result<usize> {
    let raw = words
        .next()
        .ok_or_else(|| anyhow!("`move` needs <from> <to>"))?;
    raw.parse()
        .with_context(|| format!("invalid {label} index {raw}"))
}

/// Everything a command can act on.
pub struct Console<'a> {
    pub session: &'a PlaybackSession,
    pub queue: &'a QueueStore,
    pub store: &'a dyn EpisodeStore,
}

impl Console<'_> {
    /// Runs `command`; returns false when the console must stop.
    pub async fn execute(&self, command: Command) -> Result<bool> {
        match command {
            Command::List => {
                for episode in self.store.episodes() {
                    let mark = if episode.played { "✓" } else { " " };
                    println!(
                        "{mark} {:<12} {} [{}]",
                        episode.id,
                        episode.title,
                        format_time(episode.playback_position)
                    );
                }
            }
            Command::Play(id) => {
                let current = self.session.current_episode().map(|episode| episode.id);
                if current.as_ref() == Some(&id) && self.session.state().is_controllable() {
                    self.session.play();
                } else {
                    let episode = self
                        .store
                        .episode(&id)
                        .ok_or_else(|| anyhow!("unknown episode {id}"))?;
                    self.session.load_episode(episode).await;
                }
            }
            Command::Pause => self.session.pause(),
            Command::Toggle => self.session.toggle_play_pause(),
            Command::Seek(secs) => self.session.seek(secs).await,
            Command::Forward => self.session.seek_forward().await,
            Command::Rewind => self.session.seek_backward().await,
            Command::Queue => {
                let items = self.queue.items();
                if items.is_empty() {
                    println!("(queue is empty)");
                }
                for (index, id) in items.iter().enumerate() {
                    let title = self
                        .store
                        .episode(id)
                        .map(|episode| episode.title)
                        .unwrap_or_else(|| "<missing>".to_string());
                    println!("{index:>3}. {id} {title}");
                }
            }
            Command::Add(id) => {
                self.ensure_known(&id)?;
                report(self.queue.append(&id), "already queued");
            }
            Command::Next(id) => {
                self.ensure_known(&id)?;
                report(self.queue.add_to_top(&id), "already next");
            }
            Command::Remove(id) => report(self.queue.remove(&id), "not queued"),
            Command::Later(id) => report(self.queue.move_to_end(&id), "not queued or already last"),
            Command::Move { from, to } => report(self.queue.reorder(from, to), "nothing to move"),
            Command::Played(id) => {
                let played = match self.session.current_episode() {
                    Some(episode) if episode.id == id => episode.played,
                    _ => {
                        self.store
                            .episode(&id)
                            .ok_or_else(|| anyhow!("unknown episode {id}"))?
                            .played
                    }
                };
                self.session.set_played(&id, !played)?;
                println!("{id} marked {}", if played { "unplayed" } else { "played" });
            }
            Command::Status => println!("{}", describe(&self.session.snapshot(), self.session.artwork())),
            Command::Help => println!("{HELP}"),
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn ensure_known(&self, id: &EpisodeId) -> Result<()> {
        self.store
            .episode(id)
            .map(|_| ())
            .ok_or_else(|| anyhow!("unknown episode {id}"))
    }
}

fn report(changed: bool, unchanged: &str) {
    if !changed {
        println!("({unchanged})");
    }
}

pub fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

pub fn describe(snapshot: &SessionSnapshot, artwork: Option<String>) -> String {
    let Some(episode) = &snapshot.episode else {
        return "Nothing loaded".to_string();
    };
    let state = match &snapshot.state {
        SessionState::Failed { reason } => format!("Failed ({reason})"),
        state => format!("{state:?}"),
    };
    let mut line = format!(
        "{} | {} | {} / {}",
        episode.title,
        state,
        format_time(snapshot.position),
        format_time(snapshot.duration)
    );
    if let Some(artwork) = artwork {
        line.push_str(&format!(" | {artwork}"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(
            "play e42".parse::<Command>().unwrap(),
            Command::Play(EpisodeId::from("e42"))
        );
        assert_eq!("seek 90.5".parse::<Command>().unwrap(), Command::Seek(90.5));
        assert_eq!(
            "move 3 0".parse::<Command>().unwrap(),
            Command::Move { from: 3, to: 0 }
        );
        assert_eq!("  QUIT ".parse::<Command>().unwrap(), Command::Quit);
    }

    #[test]
    fn rejects_incomplete_commands() {
        assert!("play".parse::<Command>().is_err());
        assert!("seek soon".parse::<Command>().is_err());
        assert!("move 1".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
    }

    #[test]
    fn formats_minutes_and_seconds() {
        assert_eq!(format_time(0.0), "00:00");
        assert_eq!(format_time(125.9), "02:05");
        assert_eq!(format_time(-3.0), "00:00");
    }
}
