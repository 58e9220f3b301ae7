use pulseboard_core::health::{ProviderBadge, WorkerHealth};
use pulseboard_core::metrics::TrendLabel;
use pulseboard_core::TaskState;
use pulseboard_monitor::event_stream::ConnectionState;
use ratatui::style::Color;

#[derive(Clone, Copy)]
pub struct Theme {
    pub bg: Color,
    pub surface: Color,
    pub border: Color,
    pub title: Color,
    pub text: Color,
    pub muted: Color,
    pub accent: Color,
    pub ok: Color,
    pub warn: Color,
    pub critical: Color,
    pub info: Color,
}

pub fn theme() -> Theme {
    Theme {
        bg: Color::Rgb(11, 18, 32),
        surface: Color::Rgb(17, 26, 46),
        border: Color::Rgb(71, 85, 105),
        title: Color::Rgb(191, 219, 254),
        text: Color::Rgb(226, 232, 240),
        muted: Color::Rgb(148, 163, 184),
        accent: Color::Rgb(56, 189, 248),
        ok: Color::Rgb(34, 197, 94),
        warn: Color::Rgb(245, 158, 11),
        critical: Color::Rgb(239, 68, 68),
        info: Color::Rgb(59, 130, 246),
    }
}

impl Theme {
    pub fn connection(&self, state: ConnectionState) -> Color {
        match state {
            ConnectionState::Connected => self.ok,
            ConnectionState::Connecting | ConnectionState::Reconnecting => self.warn,
            ConnectionState::Disconnected => self.critical,
        }
    }

    pub fn worker(&self, health: WorkerHealth) -> Color {
        match health {
            WorkerHealth::Healthy => self.ok,
            WorkerHealth::Stale => self.warn,
            WorkerHealth::Unhealthy => self.critical,
            WorkerHealth::Unknown => self.muted,
        }
    }

    pub fn provider(&self, badge: ProviderBadge) -> Color {
        match badge {
            ProviderBadge::Active => self.ok,
            ProviderBadge::Limited => self.warn,
            ProviderBadge::Issue => self.critical,
        }
    }

    pub fn task_state(&self, state: TaskState) -> Color {
        match state {
            TaskState::Completed => self.ok,
            TaskState::Active => self.info,
            TaskState::Pending | TaskState::Scheduled | TaskState::Unknown => self.muted,
            TaskState::Failed => self.warn,
            TaskState::Dlq => self.critical,
        }
    }

    pub fn trend(&self, label: TrendLabel) -> Color {
        match label {
            TrendLabel::AccumulatingBacklog => self.critical,
            TrendLabel::ClearingBacklog => self.ok,
            TrendLabel::Stable => self.accent,
        }
    }
}
