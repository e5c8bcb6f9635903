//! Full channel mode application.
//!
//! One parser serves MODE and TMODE. It walks the mode string applying
//! prefix changes, mask-list edits and simple modes to the live channel,
//! keeping running lists of who was opped and voiced and which ban masks
//! were set, so the post-parse hooks can enforce policy in one batched
//! pass rather than per letter.

use std::sync::Arc;

use svs_proto::irc_to_lower;

use crate::hook::{HookData, HookId};
use crate::state::{Channel, ChannelRef, Network, CHFL_OPPED, CHFL_VOICED};

/// Apply a wire mode change and fire the enforcement hooks.
///
/// `params[0]` is the mode string, the rest are its arguments.
pub fn apply_and_hook(net: &Arc<Network>, chan_ref: &ChannelRef, params: &[&str]) {
    if params.is_empty() {
        return;
    }

    let mut opped: Vec<String> = Vec::new();
    let mut voiced: Vec<String> = Vec::new();
    let mut banned: Vec<String> = Vec::new();
    let mut simple_changed = false;

    let chan_name = {
        let mut chan = chan_ref.write();
        let mode_str = params[0];
        let mut args = params[1..].iter();
        let mut adding = true;

        for c in mode_str.chars() {
            match c {
                '+' => adding = true,
                '-' => adding = false,
                'o' | 'v' => {
                    let Some(&target) = args.next() else { continue };
                    let Some(user_ref) = net.clients.find_user(target) else {
                        continue;
                    };
                    let key = user_ref.read().key();
                    let Some(member) = chan.members.get(&key) else {
                        continue;
                    };
                    let flag = if c == 'o' { CHFL_OPPED } else { CHFL_VOICED };
                    if adding {
                        member.set(flag);
                        if c == 'o' {
                            opped.push(key);
                        } else {
                            voiced.push(key);
                        }
                    } else {
                        member.clear(flag);
                    }
                }
                'b' | 'e' | 'I' => {
                    let Some(&mask) = args.next() else { continue };
                    let list = match c {
                        'b' => &mut chan.bans,
                        'e' => &mut chan.excepts,
                        _ => &mut chan.invites,
                    };
                    if adding {
                        if Channel::add_mask(list, mask) && c == 'b' {
                            banned.push(mask.to_string());
                        }
                    } else {
                        Channel::del_mask(list, mask);
                    }
                }
                'k' => {
                    let arg = args.next().copied();
                    let dir = if adding { "+k" } else { "-k" };
                    chan.modes.apply_str(dir, arg.as_slice_opt());
                    simple_changed = true;
                }
                'l' => {
                    let arg = if adding { args.next().copied() } else { None };
                    let dir = if adding { "+l" } else { "-l" };
                    chan.modes.apply_str(dir, arg.as_slice_opt());
                    simple_changed = true;
                }
                other => {
                    if svs_proto::mode::simple_mode_bit(other).is_some() {
                        let dir = if adding {
                            format!("+{}", other)
                        } else {
                            format!("-{}", other)
                        };
                        chan.modes.apply_str(&dir, &[]);
                        simple_changed = true;
                    }
                }
            }
        }
        irc_to_lower(&chan.name)
    };

    if simple_changed {
        net.hooks.call(
            net,
            HookId::ChannelModeSimple,
            &HookData::Channel {
                name: chan_name.clone(),
            },
        );
    }

    if !opped.is_empty() || !voiced.is_empty() || !banned.is_empty() {
        net.hooks.call(
            net,
            HookId::ChannelModeFull,
            &HookData::ModeBatch {
                channel: chan_name,
                opped,
                voiced,
                banned,
            },
        );
    }
}

/// Adapter: an optional `&str` as the argument slice the simple-mode
/// parser expects.
trait AsSliceOpt {
    fn as_slice_opt(&self) -> &[&str];
}

impl AsSliceOpt for Option<&str> {
    fn as_slice_opt(&self) -> &[&str] {
        match self {
            Some(s) => std::slice::from_ref(s),
            None => &[],
        }
    }
}
