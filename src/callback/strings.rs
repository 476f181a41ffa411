//! English message templates keyed by name.
//!
//! Templates use positional `{}` placeholders. A key with no entry renders as
//! the key itself, so an engine vocabulary word we have no label for still
//! shows up readable in the log.

fn lookup(key: &str) -> Option<&'static str> {
    let text = match key {
        // task chains
        "StartUp" => "Wake Up",
        "CloseDown" => "Close Game",
        "Fight" => "Combat",
        "Recruit" => "Recruit",
        "Infrast" => "Base",
        "Mall" => "Credit Store",
        "Award" => "Collect Rewards",
        "Roguelike" => "Auto I.S.",
        "Reclamation" | "Reclamation2" => "Reclamation Algorithm",
        "Copilot" => "Copilot",
        "SSSCopilot" => "Stationary Security Service",
        "Depot" => "Depot Recognition",
        "OperBox" => "Operator Box",
        "Unknown" => "Unknown Task",

        // task chain progress
        "TaskError" => "Task error: ",
        "StartTask" => "Start task: ",
        "CompleteTask" => "Completed task: ",
        "AllTasksComplete" => "All tasks completed{}",
        "RoutingRestartTooManyBattles" => {
            "Too many battles ahead on this route (node cost {}), restarting exploration"
        }

        // connection
        "ResolutionNotSupported" => "The current resolution is not supported",
        "ResolutionAcquisitionFailure" => "Failed to read the screen resolution",
        "TryToReconnect" => "Connection lost, trying to reconnect",
        "ReconnectSuccess" => "Reconnected",
        "ReconnectFailed" => "Reconnect failed, the device is disconnected",
        "ScreencapFailed" => "Screenshot failed",
        "TouchModeNotAvailable" => "The selected touch mode is not available",
        "FastestWayToScreencap" => "Fastest screenshot method: {} ms ({})",
        "FastestWayToScreencapWarningTip" => {
            "Screenshots take {} ms, which is slow and may affect recognition"
        }
        "FastestWayToScreencapErrorTip" => {
            "Screenshots take {} ms, which is severely slow; tasks may fail"
        }
        "ScreencapCost" => "Screenshot cost min {} / avg {} / max {} ms{}",

        // sub task errors
        "FailedToOpenClient" => "Failed to open the game client",
        "CloseArknightsFailed" => "Failed to close the game",
        "ErrorOccurred" => "An error occurred",
        "HasReturned" => "returned to the main screen",
        "DropRecognitionError" => "Drop recognition failed",
        "GiveUpUploadingPenguins" => "giving up uploading drop statistics",
        "TheEx" => "This stage is not valid for auto combat",
        "MissingOperators" => "Missing operators for the formation",
        "CopilotUserAdditionalNameInvalid" => "Invalid additional operator name: {}",

        // process task starts
        "MissionStart" => "Mission started",
        "StoneConfirm" => "Originite Prime used",
        "StoneUsed" => "Originite Prime used",
        "UnitTime" => "time(s)",
        "ActingCommandError" => "Auto deploy failed, abandoning the mission",
        "FightMissionFailedAndStop" => "Combat failed, stopping the task",
        "LabelsRefreshed" => "Recruitment tags refreshed",
        "RecruitConfirm" => "Recruitment confirmed",
        "InfrastDormDoubleConfirmed" => "Operator conflict in the dormitory, confirmed twice",
        "ExplorationAbandoned" => "Exploration abandoned",
        "FightCompleted" => "Combat completed",
        "FightFailed" => "Combat failed",
        "Trader" => "Node: Rogue Trader",
        "SafeHouse" => "Node: Safe House",
        "FilterTruth" => "Node: Idea Filter",
        "CombatOps" => "Node: Operation",
        "EmergencyOps" => "Node: Emergency Operation",
        "DreadfulFoe" => "Node: Dreadful Foe",
        "UpperLimit" => "Investment reached the upper limit",
        "GameDrop" => "Game disconnected, reconnecting",
        "RoguelikeGamePass" => "Exploration cleared!",
        "RoguelikeSpecialItemBought" => "Special item bought",
        "DeepExplorationNotUnlockedComplain" => "Deep exploration is not unlocked yet",
        "ReclamationPnsModeError" => "Unsupported Reclamation mode, please switch the theme",
        "ReclamationPisModeError" => "Unsupported Reclamation mode, please switch the theme",
        "CompleteCombat" => "Combat completed",

        // process task completions
        "ClueExchangeUnlocked" => "Clue exchange unlocked",
        "BegunToExplore" => "Exploration started",
        "CreditFight" => "Credit combat",
        "Visiting" => "Visiting friends",

        // sub task extra info
        "TotalDrop" => "drops:",
        "NoDrop" => "none",
        "FurnitureDrop" => "Furniture",
        "CurTimes" => "Runs",
        "StageInfoError" => "Failed to recognize the stage",
        "StageQueue" => "Stage queue",
        "UnableToAgent" => "cannot be auto deployed",
        "ThisFacility" => "Current facility: ",
        "Mfg" => "Factory",
        "Trade" => "Trading Post",
        "Power" => "Power Plant",
        "Control" => "Control Center",
        "Reception" => "Reception Room",
        "Office" => "Office",
        "Dorm" => "Dormitory",
        "Processing" => "Workshop",
        "Training" => "Training Room",
        "ProductIncorrect" => "Product does not match the configuration",
        "ProductUnknown" => "Unknown product",
        "ProductChanged" => "Product changed",
        "RoomGroupsMatch" => "Matched group: ",
        "RoomGroupsMatchFailed" => "Failed to match groups: ",
        "RoomOperators" => "Preferred operators: ",
        "TrainingIdle" => "Training room is idle",
        "TrainingLevel" => "Specialization level",
        "TrainingCompleted" => "completed",
        "TrainingTimeLeft" => "Time left",
        "RecruitingResults" => "Recruitment tags:",
        "RecruitSupportOperator" => "Support operator: {}",
        "Choose" => "Chosen",
        "Refreshed" => "Refreshed ",
        "ContinueRefresh" => "No recruitment permit, continuing to refresh tags",
        "NoRecruitmentPermit" => "No recruitment permit left",
        "NotEnoughStaff" => "Not enough operators",
        "CreditFullOnlyBuyDiscount" => "Credits are nearly full, buying discounted items only: ",
        "StartCombat" => "Start combat: ",
        "MedicineUsed" => "Sanity potion used",
        "ExpiringMedicineUsed" => "Expiring sanity potion used",
        "AlgorithmFinish" => "Reclamation round finished",
        "AlgorithmBadge" => "Badges",
        "AlgorithmConstructionPoint" => "Construction points",
        "AlgorithmDoneSmeltGold" => "Gold smelted",
        "BattleFormation" => "Formation:",
        "BattleFormationParseFailed" => "Failed to parse the formation",
        "BattleFormationSelected" => "Selected operator: ",
        "BattleFormationOperUnavailable" => "Operator {} is unavailable ({})",
        "CurrentSteps" => "Current step: {} {}",
        "ElapsedTime" => "Elapsed: {} ms",
        "CurrentStage" => "Current stage: {}",
        "SSSGamePass" => "Stationary Security Service cleared!",
        "UnsupportedLevel" => "Unsupported level: ",

        // copilot actions
        "Deploy" => "Deploy",
        "UseSkill" => "Use skill",
        "Retreat" => "Retreat",
        "SpeedUp" => "Speed up",
        "BulletTime" => "Bullet time",
        "SkillUsage" => "Skill usage",
        "Output" => "Print",
        "SkillDaemon" => "Skill daemon",
        "MoveCamera" => "Move camera",
        "DrawCard" => "Draw card",
        "CheckIfStartOver" => "Check for restart",

        // supervisor
        "InitFailed" => "Initialization failed: {}",
        "StartingTasks" => "Starting {} task(s)",
        "TasksRunning" => "Tasks running",
        _ => return None,
    };
    Some(text)
}

/// Template text for `key`, or the key itself.
pub fn tr(key: &str) -> String {
    lookup(key).unwrap_or(key).to_string()
}

/// Template text for `key` with each `{}` replaced by the next argument.
/// Surplus placeholders render empty; surplus arguments are dropped.
pub fn tr_args(key: &str, args: &[&(dyn std::fmt::Display + Sync)]) -> String {
    let Some(template) = lookup(key) else {
        return key.to_string();
    };
    let mut out = String::with_capacity(template.len() + 16);
    let mut args = args.iter();
    let mut rest = template;
    while let Some(pos) = rest.find("{}") {
        out.push_str(&rest[..pos]);
        if let Some(arg) = args.next() {
            out.push_str(&arg.to_string());
        }
        rest = &rest[pos + 2..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_render_as_themselves() {
        assert_eq!(tr("NoSuchKey"), "NoSuchKey");
        assert_eq!(tr_args("NoSuchKey", &[&1]), "NoSuchKey");
    }

    #[test]
    fn placeholders_are_filled_in_order() {
        assert_eq!(
            tr_args("FastestWayToScreencap", &[&120, &"MinitouchRaw"]),
            "Fastest screenshot method: 120 ms (MinitouchRaw)"
        );
        assert_eq!(
            tr_args("ScreencapCost", &[&1, &2]),
            "Screenshot cost min 1 / avg 2 / max  ms"
        );
    }

    #[test]
    fn fight_has_a_label() {
        assert_eq!(tr("Fight"), "Combat");
    }
}
