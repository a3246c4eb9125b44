use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use visual::{
    EffectDraft, EffectId, EffectRegistry, EncodeError, NameTagStyle, Style, StylePayload,
    TabListStyle, Tick, ViewerId, Visibility,
};

use crate::config::{NameTagConfig, ServerConfig};

/// What the tab-list producer needs to know about one viewer.
#[derive(Debug, Clone)]
pub struct TabEntry {
    pub viewer: ViewerId,
    pub name: String,
    pub rtt_ms: Option<u32>,
}

/// Keeps one per-viewer tab-list header and footer in the registry.
pub struct TabListProducer {
    header: String,
    footer: String,
    period: u64,
    max_viewers: usize,
    published: HashMap<ViewerId, (EffectId, TabListStyle)>,
}

impl TabListProducer {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            header: config.tab_header.clone(),
            footer: config.tab_footer.clone(),
            period: config.tab_refresh_ticks.max(1),
            max_viewers: config.max_viewers,
            published: HashMap::new(),
        }
    }

    pub fn is_due(&self, tick: Tick) -> bool {
        tick % self.period == 0
    }

    /// Publishes a tab list for new viewers and updates the others only when
    /// their text changed. Returns how many effects were touched.
    pub fn refresh(
        &mut self,
        registry: &EffectRegistry,
        entries: &[TabEntry],
    ) -> Result<usize, EncodeError> {
        let online = entries.len();
        let mut touched = 0;

        for entry in entries {
            let style = self.render(entry, online);

            match self.published.get_mut(&entry.viewer) {
                Some((_, current)) if *current == style => {}
                Some((id, current)) => {
                    let payload = StylePayload::encode(&Style::TabList(style.clone()))?;
                    if registry.update(*id, payload).is_ok() {
                        *current = style;
                        touched += 1;
                    }
                }
                None => {
                    let draft = EffectDraft::from_style(&Style::TabList(style.clone()))?
                        .visible_to(Visibility::only([entry.viewer]));
                    let id = registry.publish(draft);
                    self.published.insert(entry.viewer, (id, style));
                    touched += 1;
                }
            }
        }

        Ok(touched)
    }

    pub fn remove(&mut self, registry: &EffectRegistry, viewer: ViewerId) {
        if let Some((id, _)) = self.published.remove(&viewer) {
            let _ = registry.retract(id);
        }
    }

    fn render(&self, entry: &TabEntry, online: usize) -> TabListStyle {
        let ping = entry
            .rtt_ms
            .map_or_else(|| "?".to_owned(), |rtt| rtt.to_string());

        TabListStyle {
            header: self
                .header
                .replace("{online}", &online.to_string())
                .replace("{max}", &self.max_viewers.to_string()),
            footer: self
                .footer
                .replace("{name}", &entry.name)
                .replace("{ping}", &ping),
        }
    }
}

type Worlds = Arc<RwLock<HashMap<ViewerId, u32>>>;

/// One name tag per viewer, visible to the other viewers in the same world.
pub struct NameTagProducer {
    style: NameTagConfig,
    worlds: Worlds,
    tags: HashMap<ViewerId, EffectId>,
}

impl NameTagProducer {
    pub fn new(style: NameTagConfig) -> Self {
        Self {
            style,
            worlds: Worlds::default(),
            tags: HashMap::new(),
        }
    }

    /// Publishes the tag for `viewer`, styled by `rank` when the player has
    /// one and by the default style otherwise.
    pub fn add(
        &mut self,
        registry: &EffectRegistry,
        viewer: ViewerId,
        world: u32,
        rank: Option<&NameTagConfig>,
    ) -> Result<EffectId, EncodeError> {
        self.worlds.write().insert(viewer, world);

        let rank = rank.unwrap_or(&self.style);
        let style = Style::NameTag(NameTagStyle {
            target: viewer,
            prefix: rank.prefix.clone(),
            suffix: rank.suffix.clone(),
            name_color_rgb: rank.color_rgb,
            priority: rank.priority,
        });
        let worlds = Arc::clone(&self.worlds);
        let draft = EffectDraft::from_style(&style)?.visible_to(Visibility::predicate(
            move |observer, _| {
                observer != viewer && {
                    let worlds = worlds.read();
                    worlds.get(&observer).is_some_and(|w| worlds.get(&viewer) == Some(w))
                }
            },
        ));

        let id = registry.publish(draft);
        if let Some(previous) = self.tags.insert(viewer, id) {
            let _ = registry.retract(previous);
        }
        Ok(id)
    }

    /// Moves `viewer` to `world`. Returns the viewers whose view of name tags
    /// changed, which is everyone in the old and the new world.
    pub fn move_to(&mut self, viewer: ViewerId, world: u32) -> Vec<ViewerId> {
        let mut worlds = self.worlds.write();
        let Some(previous) = worlds.insert(viewer, world) else {
            return Vec::new();
        };
        if previous == world {
            return Vec::new();
        }

        let mut affected: Vec<ViewerId> = worlds
            .iter()
            .filter(|(_, w)| **w == previous || **w == world)
            .map(|(v, _)| *v)
            .collect();
        affected.sort_unstable();
        affected
    }

    pub fn remove(&mut self, registry: &EffectRegistry, viewer: ViewerId) {
        self.worlds.write().remove(&viewer);
        if let Some(id) = self.tags.remove(&viewer) {
            let _ = registry.retract(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(viewer: ViewerId, rtt_ms: Option<u32>) -> TabEntry {
        TabEntry {
            viewer,
            name: format!("viewer{viewer}"),
            rtt_ms,
        }
    }

    fn tab_style(registry: &EffectRegistry, id: EffectId) -> TabListStyle {
        match registry.get(id).unwrap().style().decode().unwrap() {
            Style::TabList(style) => style,
            other => panic!("unexpected style {other:?}"),
        }
    }

    #[test]
    fn tab_list_updates_only_on_change() {
        let registry = EffectRegistry::new();
        let mut producer = TabListProducer::new(&ServerConfig::default());

        assert_eq!(producer.refresh(&registry, &[entry(1, Some(40))]).unwrap(), 1);
        let (id, _) = producer.published[&1].clone();
        assert_eq!(tab_style(&registry, id).header, "1/32 players");
        assert_eq!(tab_style(&registry, id).footer, "viewer1 - ping 40ms");

        assert_eq!(producer.refresh(&registry, &[entry(1, Some(40))]).unwrap(), 0);
        assert_eq!(registry.get(id).unwrap().version(), 1);

        producer.refresh(&registry, &[entry(1, Some(40)), entry(2, None)]).unwrap();
        assert_eq!(registry.get(id).unwrap().version(), 2);
        assert_eq!(tab_style(&registry, id).header, "2/32 players");
    }

    #[test]
    fn tab_list_is_private_to_its_viewer() {
        let registry = EffectRegistry::new();
        let mut producer = TabListProducer::new(&ServerConfig::default());
        producer.refresh(&registry, &[entry(1, None)]).unwrap();

        let descriptor = registry.get(producer.published[&1].0).unwrap();
        assert!(descriptor.is_visible_to(1));
        assert!(!descriptor.is_visible_to(2));

        producer.remove(&registry, 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn refresh_runs_every_period() {
        let producer = TabListProducer::new(&ServerConfig::default());
        assert!(producer.is_due(20));
        assert!(!producer.is_due(21));
    }

    #[test]
    fn name_tags_follow_worlds() {
        let registry = EffectRegistry::new();
        let mut producer = NameTagProducer::new(NameTagConfig::default());
        let tag = producer.add(&registry, 1, 0, None).unwrap();
        producer.add(&registry, 2, 0, None).unwrap();
        producer.add(&registry, 3, 1, None).unwrap();

        let descriptor = registry.get(tag).unwrap();
        assert!(!descriptor.is_visible_to(1));
        assert!(descriptor.is_visible_to(2));
        assert!(!descriptor.is_visible_to(3));

        assert_eq!(producer.move_to(3, 0), vec![1, 2, 3]);
        assert!(descriptor.is_visible_to(3));
        assert!(producer.move_to(3, 0).is_empty());

        producer.remove(&registry, 1);
        assert!(registry.get(tag).is_none());
    }

    fn name_tag_style(registry: &EffectRegistry, id: EffectId) -> NameTagStyle {
        match registry.get(id).unwrap().style().decode().unwrap() {
            Style::NameTag(style) => style,
            other => panic!("unexpected style {other:?}"),
        }
    }

    #[test]
    fn ranked_viewers_get_their_own_tag() {
        let registry = EffectRegistry::new();
        let mut producer = NameTagProducer::new(NameTagConfig::default());
        let admin = NameTagConfig {
            prefix: Some("[admin] ".into()),
            suffix: Some(" *".into()),
            color_rgb: 0xff_55_55,
            priority: 100,
        };

        let ranked = producer.add(&registry, 1, 0, Some(&admin)).unwrap();
        let plain = producer.add(&registry, 2, 0, None).unwrap();

        let ranked = name_tag_style(&registry, ranked);
        assert_eq!(ranked.prefix.as_deref(), Some("[admin] "));
        assert_eq!(ranked.suffix.as_deref(), Some(" *"));
        assert_eq!(ranked.priority, 100);

        let plain = name_tag_style(&registry, plain);
        assert_eq!(plain.prefix, NameTagConfig::default().prefix);
        assert_eq!(plain.priority, 0);
    }
}
