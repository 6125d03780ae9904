/// Recognized wire commands. Numeric codes are part of the wire contract
/// and must never be renumbered once deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Produce,
    Consume,
    CreateTopics,
    DeleteTopic,
    ListTopics,
    GetTopic,
    CreateConsumer,
    DeleteConsumer,
    Heartbeat,
    CommitOffset,
    ListGroups,
    GetGroup,
}

impl Command {
    pub fn code(self) -> i16 {
        match self {
            Command::Produce => 0,
            Command::Consume => 1,
            Command::CreateTopics => 2,
            Command::DeleteTopic => 3,
            Command::ListTopics => 4,
            Command::GetTopic => 5,
            Command::CreateConsumer => 6,
            Command::DeleteConsumer => 7,
            Command::Heartbeat => 8,
            Command::CommitOffset => 9,
            Command::ListGroups => 10,
            Command::GetGroup => 11,
        }
    }

    pub fn from_code(code: i16) -> Option<Command> {
        Some(match code {
            0 => Command::Produce,
            1 => Command::Consume,
            2 => Command::CreateTopics,
            3 => Command::DeleteTopic,
            4 => Command::ListTopics,
            5 => Command::GetTopic,
            6 => Command::CreateConsumer,
            7 => Command::DeleteConsumer,
            8 => Command::Heartbeat,
            9 => Command::CommitOffset,
            10 => Command::ListGroups,
            11 => Command::GetGroup,
            _ => return None,
        })
    }

    /// True for commands that attach a long-lived push stream rather than
    /// producing a single response.
    pub fn is_streaming(self) -> bool {
        matches!(self, Command::Consume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trips_for_all_variants() {
        let all = [
            Command::Produce,
            Command::Consume,
            Command::CreateTopics,
            Command::DeleteTopic,
            Command::ListTopics,
            Command::GetTopic,
            Command::CreateConsumer,
            Command::DeleteConsumer,
            Command::Heartbeat,
            Command::CommitOffset,
            Command::ListGroups,
            Command::GetGroup,
        ];
        for cmd in all {
            assert_eq!(Command::from_code(cmd.code()), Some(cmd));
        }
    }
}
