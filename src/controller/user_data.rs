// src/controller/user_data.rs

//! Renders the shell script handed to a cloud instance's boot-up hook
//! (spec.md §4.G step 3, GLOSSARY "User-data"). Driving the instance API
//! itself is an external collaborator (spec.md §1); this module only
//! owns the text the controller hands that collaborator.

use crate::core::model::{DormantServer, WipeKind};

/// The commands `StartServer` step 2 prepares when the current wipe is
/// still pending, keyed by wipe kind (spec.md §4.G step 2, §8 scenarios
/// 1-3: map-wipe touches only procedural map files, full-wipe touches
/// both map and blueprint files).
fn wipe_removal_commands(kind: WipeKind) -> Vec<String> {
    match kind {
        WipeKind::Map => vec!["find /home/rust/server/identity -name \"proceduralmap*\" | xargs rm -f".to_string()],
        WipeKind::Full => vec![
            "find /home/rust/server/identity -name \"proceduralmap*\" | xargs rm -f".to_string(),
            "find /home/rust/server/identity -name \"player.blueprints*\" | xargs rm -f".to_string(),
        ],
    }
}

/// Assembles the full user-data script: identity/name/RCON/world
/// parameters, the queue-bypass plugin installer, `user.cfg`
/// (moderators/owners), `server.cfg` (active VIPs, launch options), and
/// any pending wipe's removal commands (spec.md §4.G step 3).
pub fn render(dormant: &DormantServer, pending_wipe_commands: &[String]) -> String {
    let server = &dormant.server;
    let mut script = String::new();

    script.push_str("#!/bin/bash\n");
    script.push_str("set -euo pipefail\n\n");

    script.push_str(&format!(
        "SERVER_NAME=\"{}\"\nSERVER_IDENTITY=\"{}\"\nRCON_PASSWORD=\"{}\"\n",
        server.name, server.id, server.rcon_password,
    ));
    script.push_str(&format!(
        "MAX_PLAYERS={}\nMAP_SIZE={}\nTICK_RATE={}\n\n",
        server.world.max_players, server.world.map_size, server.world.tick_rate,
    ));

    for command in pending_wipe_commands {
        script.push_str(command);
        script.push('\n');
    }
    if !pending_wipe_commands.is_empty() {
        script.push('\n');
    }

    script.push_str("# install queue-bypass plugin\n");
    script.push_str("curl -sSL -o oxide/plugins/BypassQueue.cs https://umod.org/plugins/bypass-queue.cs\n\n");

    script.push_str("cat >> server/user.cfg <<'EOF'\n");
    for owner in &server.owners {
        script.push_str(&format!("ownerid \"{}\" \"\" \"\"\n", owner.steam_id));
    }
    for moderator in &server.moderators {
        script.push_str(&format!("moderatorid \"{}\" \"\" \"\"\n", moderator.steam_id));
    }
    script.push_str("EOF\n\n");

    script.push_str("cat >> server/server.cfg <<'EOF'\n");
    for vip in server.active_vips() {
        script.push_str(&format!("oxide.usergroup add {} vip\n", vip.steam_id));
    }
    for (key, value) in &server.options {
        script.push_str(&format!("{key} \"{value}\"\n"));
    }
    script.push_str("EOF\n");

    script
}

/// Convenience wrapper for `StartServer` step 2: returns the removal
/// commands for `wipe` if it is still pending, else an empty slice.
pub fn pending_wipe_commands(wipe: Option<&crate::core::model::Wipe>) -> Vec<String> {
    match wipe {
        Some(w) if w.is_pending() => wipe_removal_commands(w.kind),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Server, StateKind, Vip, WipeKind, WorldParams};
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    fn dormant_with(vips: Vec<Vip>) -> DormantServer {
        let server = Server {
            id: Uuid::new_v4(),
            name: "Rustpm US-West".into(),
            region: "us-west".into(),
            instance_kind: "m5.large".into(),
            instance_id: None,
            allocation_id: None,
            public_ip: None,
            world: WorldParams {
                max_players: 200,
                map_size: 4000,
                tick_rate: 30,
            },
            rcon_password: "hunter2".into(),
            description: String::new(),
            banner_url: None,
            background_tag: None,
            owners: vec![],
            moderators: vec![],
            vips,
            events: vec![],
            wipes: vec![],
            tags: vec![],
            options: vec![("server.saveinterval".into(), "300".into())],
            state_id: Uuid::new_v4(),
            state_kind: StateKind::Dormant,
        };
        DormantServer {
            state_id: server.state_id,
            server,
        }
    }

    #[test]
    fn map_wipe_commands_touch_only_procedural_map_files() {
        let commands = wipe_removal_commands(WipeKind::Map);
        let script = render(&dormant_with(vec![]), &commands);
        let map_re = regex::Regex::new(r"proceduralmap.*\| xargs rm").unwrap();
        let blueprint_re = regex::Regex::new(r"player\.blueprints.*\| xargs rm").unwrap();
        assert!(map_re.is_match(&script));
        assert!(!blueprint_re.is_match(&script));
    }

    #[test]
    fn full_wipe_commands_touch_map_and_blueprint_files() {
        let commands = wipe_removal_commands(WipeKind::Full);
        let script = render(&dormant_with(vec![]), &commands);
        let map_re = regex::Regex::new(r"proceduralmap.*\| xargs rm").unwrap();
        let blueprint_re = regex::Regex::new(r"player\.blueprints.*\| xargs rm").unwrap();
        assert!(map_re.is_match(&script));
        assert!(blueprint_re.is_match(&script));
    }

    #[test]
    fn no_pending_wipe_emits_no_removal_commands() {
        let script = render(&dormant_with(vec![]), &[]);
        assert!(!script.contains("xargs rm"));
    }

    #[test]
    fn expired_vip_is_excluded_from_group_assignment() {
        let expired = Vip {
            steam_id: "76561197960287930".into(),
            server_id: Uuid::new_v4(),
            expiry: Utc::now() - Duration::minutes(1),
            subscription_id: "sub_1".into(),
        };
        let script = render(&dormant_with(vec![expired]), &[]);
        assert!(!script.contains("oxide.usergroup add 76561197960287930 vip"));
    }

    #[test]
    fn active_vip_is_included_in_group_assignment() {
        let active = Vip {
            steam_id: "76561197960287931".into(),
            server_id: Uuid::new_v4(),
            expiry: Utc::now() + Duration::days(1),
            subscription_id: "sub_2".into(),
        };
        let script = render(&dormant_with(vec![active]), &[]);
        assert!(script.contains("oxide.usergroup add 76561197960287931 vip"));
    }
}
