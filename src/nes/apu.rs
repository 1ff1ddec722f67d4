use std::collections::VecDeque;
use std::f32::consts::PI;

const CPU_CLOCK_HZ: f64 = 1_789_772.727_272_727_3;
const DEFAULT_SAMPLE_RATE: u32 = 44_100;

const LENGTH_TABLE: [u8; 32] = [
    10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14, 12, 16, 24, 18, 48, 20, 96, 22,
    192, 24, 72, 26, 16, 28, 32, 30,
];

const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 1, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0],
    [1, 0, 0, 1, 1, 1, 1, 1],
];

const TRI_TABLE: [u8; 32] = [
    15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12,
    13, 14, 15,
];

const NOISE_PERIOD_TABLE: [u16; 16] = [
    4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 762, 1016, 2034, 4068,
];

const DMC_RATE_TABLE: [u16; 16] = [
    428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54,
];

// Frame sequencer boundaries in CPU cycles (~240 Hz quarters). The first
// three are shared by both modes; the tail differs.
const FC_QUARTER_1: u32 = 7_457;
const FC_HALF_2: u32 = 14_913;
const FC_QUARTER_3: u32 = 22_371;
const FC_STEP_4: u32 = 29_829;
const FC_4STEP_WRAP: u32 = 29_830;
const FC_STEP_5: u32 = 37_281;
const FC_5STEP_WRAP: u32 = 37_282;

pub struct Apu {
    pulse1: PulseChannel,
    pulse2: PulseChannel,
    triangle: TriangleChannel,
    noise: NoiseChannel,
    dmc: DmcChannel,

    frame_counter: u32,
    frame_mode_5_step: bool,
    frame_irq_inhibit: bool,
    frame_irq_flag: bool,
    frame_counter_write_pending: bool,
    frame_counter_write_value: u8,
    frame_counter_write_delay: u8,

    cpu_cycle: u64,
    sample_rate: u32,
    sample_phase: f64,
    // Bounded single-producer ring; the host drains it, overflow drops
    // the oldest samples rather than blocking the core.
    samples: VecDeque<i16>,
    max_queued_samples: usize,

    hp90_prev_in: f32,
    hp90_prev_out: f32,
    hp90_a: f32,
    hp440_prev_in: f32,
    hp440_prev_out: f32,
    hp440_a: f32,
    lp14k_prev_out: f32,
    lp14k_a: f32,
    dmc_dma_request: Option<u16>,
}

impl Apu {
    pub fn new() -> Self {
        let mut apu = Self {
            pulse1: PulseChannel::new(true),
            pulse2: PulseChannel::new(false),
            triangle: TriangleChannel::default(),
            noise: NoiseChannel::new(),
            dmc: DmcChannel::new(),
            frame_counter: 0,
            frame_mode_5_step: false,
            frame_irq_inhibit: false,
            frame_irq_flag: false,
            frame_counter_write_pending: false,
            frame_counter_write_value: 0,
            frame_counter_write_delay: 0,
            cpu_cycle: 0,
            sample_rate: DEFAULT_SAMPLE_RATE,
            sample_phase: 0.0,
            samples: VecDeque::with_capacity(2048),
            max_queued_samples: 0,
            hp90_prev_in: 0.0,
            hp90_prev_out: 0.0,
            hp90_a: 0.0,
            hp440_prev_in: 0.0,
            hp440_prev_out: 0.0,
            hp440_a: 0.0,
            lp14k_prev_out: 0.0,
            lp14k_a: 0.0,
            dmc_dma_request: None,
        };
        apu.update_rate_derived();
        apu
    }

    pub fn reset(&mut self) {
        self.pulse1 = PulseChannel::new(true);
        self.pulse2 = PulseChannel::new(false);
        self.triangle = TriangleChannel::default();
        self.noise = NoiseChannel::new();
        self.dmc = DmcChannel::new();
        self.frame_counter = 0;
        self.frame_mode_5_step = false;
        self.frame_irq_inhibit = false;
        self.frame_irq_flag = false;
        self.frame_counter_write_pending = false;
        self.frame_counter_write_value = 0;
        self.frame_counter_write_delay = 0;
        self.cpu_cycle = 0;
        self.sample_phase = 0.0;
        self.samples.clear();
        self.hp90_prev_in = 0.0;
        self.hp90_prev_out = 0.0;
        self.hp440_prev_in = 0.0;
        self.hp440_prev_out = 0.0;
        self.lp14k_prev_out = 0.0;
        self.dmc_dma_request = None;
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(8_000);
        self.update_rate_derived();
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn write_register(&mut self, addr: u16, value: u8) {
        match addr {
            0x4000 => self.pulse1.set_control(value),
            0x4001 => self.pulse1.sweep.configure(value),
            0x4002 => self.pulse1.set_timer_low(value),
            0x4003 => self.pulse1.set_timer_high(value),

            0x4004 => self.pulse2.set_control(value),
            0x4005 => self.pulse2.sweep.configure(value),
            0x4006 => self.pulse2.set_timer_low(value),
            0x4007 => self.pulse2.set_timer_high(value),

            0x4008 => self.triangle.set_linear(value),
            0x400A => self.triangle.set_timer_low(value),
            0x400B => self.triangle.set_timer_high(value),

            0x400C => self.noise.set_control(value),
            0x400E => self.noise.set_period(value),
            0x400F => self.noise.set_length(value),

            0x4010 => self.dmc.write_control(value),
            0x4011 => self.dmc.write_output_level(value),
            0x4012 => self.dmc.write_sample_addr(value),
            0x4013 => self.dmc.write_sample_length(value),

            0x4015 => self.write_status(value),
            0x4017 => self.write_frame_counter(value),
            _ => {}
        }
    }

    /// $4015 read: per-channel length status plus IRQ flags. Clears the
    /// frame IRQ flag as a side effect.
    pub fn read_status(&mut self) -> u8 {
        let mut status = 0u8;
        for (bit, active) in [
            (0x01, self.pulse1.length > 0),
            (0x02, self.pulse2.length > 0),
            (0x04, self.triangle.length > 0),
            (0x08, self.noise.length > 0),
            (0x10, self.dmc.playback_active()),
            (0x40, self.frame_irq_flag),
            (0x80, self.dmc.irq_flag),
        ] {
            if active {
                status |= bit;
            }
        }

        self.frame_irq_flag = false;
        status
    }

    pub fn irq_pending(&self) -> bool {
        self.frame_irq_flag || self.dmc.irq_flag
    }

    /// Advances the APU by one CPU cycle. Pulse and noise timers run at
    /// half CPU rate; triangle and DMC timers every cycle.
    pub fn tick(&mut self) {
        self.cpu_cycle = self.cpu_cycle.wrapping_add(1);

        if self.frame_counter_write_pending {
            if self.frame_counter_write_delay > 0 {
                self.frame_counter_write_delay -= 1;
            }
            if self.frame_counter_write_delay == 0 {
                self.apply_frame_counter_write(self.frame_counter_write_value);
                self.frame_counter_write_pending = false;
            }
        }

        if (self.cpu_cycle & 1) == 0 {
            self.pulse1.clock_timer();
            self.pulse2.clock_timer();
            self.noise.clock_timer();
        }
        self.triangle.clock_timer();
        self.dmc.clock_timer();
        if self.dmc.needs_dma() && self.dmc_dma_request.is_none() {
            self.dmc_dma_request = Some(self.dmc.current_dma_addr());
        }

        self.clock_frame_counter();

        self.sample_phase += self.sample_rate as f64;
        while self.sample_phase >= CPU_CLOCK_HZ {
            self.sample_phase -= CPU_CLOCK_HZ;
            let mixed = self.mix_sample();
            let filtered = self.apply_output_filters(mixed);
            self.push_sample(filtered);
        }
    }

    /// Drains every sample produced since the last call.
    pub fn take_samples(&mut self) -> Vec<i16> {
        self.samples.drain(..).collect()
    }

    pub fn take_dmc_dma_request(&mut self) -> Option<u16> {
        self.dmc_dma_request.take()
    }

    pub fn complete_dmc_dma(&mut self, value: u8) {
        self.dmc.consume_dma_byte(value);
        if self.dmc.needs_dma() && self.dmc_dma_request.is_none() {
            self.dmc_dma_request = Some(self.dmc.current_dma_addr());
        }
    }

    fn push_sample(&mut self, sample: f32) {
        if self.samples.len() >= self.max_queued_samples {
            self.samples.pop_front();
        }
        let scaled = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        self.samples.push_back(scaled);
    }

    fn write_status(&mut self, value: u8) {
        // Any write to $4015 clears a pending DMC IRQ.
        self.dmc.irq_flag = false;

        self.pulse1.set_enabled(value & 0x01 != 0);
        self.pulse2.set_enabled(value & 0x02 != 0);
        self.triangle.set_enabled(value & 0x04 != 0);
        self.noise.set_enabled(value & 0x08 != 0);

        self.dmc.enabled = value & 0x10 != 0;
        if !self.dmc.enabled {
            self.dmc.stop();
        } else if !self.dmc.playback_active() {
            self.dmc.restart_sample();
            if self.dmc.needs_dma() && self.dmc_dma_request.is_none() {
                self.dmc_dma_request = Some(self.dmc.current_dma_addr());
            }
        }
    }

    fn write_frame_counter(&mut self, value: u8) {
        if value & 0x40 != 0 {
            self.frame_irq_flag = false;
        }
        // The mode change lands 3-4 cycles after the write by CPU phase.
        self.frame_counter_write_pending = true;
        self.frame_counter_write_value = value;
        self.frame_counter_write_delay = if (self.cpu_cycle & 1) == 0 { 3 } else { 4 };
    }

    fn apply_frame_counter_write(&mut self, value: u8) {
        self.frame_mode_5_step = value & 0x80 != 0;
        self.frame_irq_inhibit = value & 0x40 != 0;
        self.frame_counter = 0;
        if self.frame_irq_inhibit {
            self.frame_irq_flag = false;
        }
        // Selecting the 5-step mode ticks every unit right away.
        if self.frame_mode_5_step {
            self.clock_quarter_frame();
            self.clock_half_frame();
        }
    }

    fn clock_frame_counter(&mut self) {
        self.frame_counter += 1;
        let five_step = self.frame_mode_5_step;

        match self.frame_counter {
            FC_QUARTER_1 | FC_QUARTER_3 => self.clock_quarter_frame(),
            FC_HALF_2 => {
                self.clock_quarter_frame();
                self.clock_half_frame();
            }
            FC_STEP_4 if !five_step => {
                self.clock_quarter_frame();
                self.clock_half_frame();
                self.raise_frame_irq();
            }
            FC_4STEP_WRAP if !five_step => {
                self.raise_frame_irq();
                self.frame_counter = 0;
            }
            FC_STEP_5 if five_step => {
                self.clock_quarter_frame();
                self.clock_half_frame();
            }
            FC_5STEP_WRAP if five_step => self.frame_counter = 0,
            _ => {}
        }
    }

    fn raise_frame_irq(&mut self) {
        if !self.frame_irq_inhibit {
            self.frame_irq_flag = true;
        }
    }

    fn clock_quarter_frame(&mut self) {
        self.pulse1.envelope.clock();
        self.pulse2.envelope.clock();
        self.triangle.clock_linear();
        self.noise.envelope.clock();
    }

    fn clock_half_frame(&mut self) {
        self.pulse1.clock_length();
        self.pulse1.clock_sweep();
        self.pulse2.clock_length();
        self.pulse2.clock_sweep();
        self.triangle.clock_length();
        self.noise.clock_length();
    }

    // Canonical non-linear mixer.
    fn mix_sample(&self) -> f32 {
        let pulse = (self.pulse1.output() + self.pulse2.output()) as f32;
        let pulse_out = if pulse > 0.0 {
            95.88 / (8128.0 / pulse + 100.0)
        } else {
            0.0
        };

        let tnd = self.triangle.output() as f32 / 8227.0
            + self.noise.output() as f32 / 12241.0
            + self.dmc.output() as f32 / 22638.0;
        let tnd_out = if tnd > 0.0 {
            159.79 / (1.0 / tnd + 100.0)
        } else {
            0.0
        };

        pulse_out + tnd_out
    }

    fn update_rate_derived(&mut self) {
        let dt = 1.0f32 / self.sample_rate as f32;
        self.hp90_a = high_pass_alpha(90.0, dt);
        self.hp440_a = high_pass_alpha(440.0, dt);
        self.lp14k_a = low_pass_alpha(14_000.0, dt);
        self.max_queued_samples = ((self.sample_rate as usize) * 96) / 1000;
    }

    fn apply_output_filters(&mut self, mut sample: f32) -> f32 {
        let hp90 = self.hp90_a * (self.hp90_prev_out + sample - self.hp90_prev_in);
        self.hp90_prev_in = sample;
        self.hp90_prev_out = hp90;
        sample = hp90;

        let hp440 = self.hp440_a * (self.hp440_prev_out + sample - self.hp440_prev_in);
        self.hp440_prev_in = sample;
        self.hp440_prev_out = hp440;
        sample = hp440;

        self.lp14k_prev_out += self.lp14k_a * (sample - self.lp14k_prev_out);
        self.lp14k_prev_out
    }
}

fn high_pass_alpha(cutoff_hz: f32, dt: f32) -> f32 {
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    rc / (rc + dt)
}

fn low_pass_alpha(cutoff_hz: f32, dt: f32) -> f32 {
    let rc = 1.0 / (2.0 * PI * cutoff_hz);
    dt / (rc + dt)
}

/// Volume unit shared by the pulse and noise voices: a divider-driven
/// decay from 15, optionally looping, optionally bypassed by a constant
/// volume. The 4-bit period doubles as the constant volume level.
#[derive(Clone, Copy, Default)]
struct Envelope {
    start: bool,
    divider: u8,
    decay: u8,
    period: u8,
    looping: bool,
    constant: bool,
}

impl Envelope {
    fn configure(&mut self, value: u8) {
        self.period = value & 0x0F;
        self.constant = value & 0x10 != 0;
        self.looping = value & 0x20 != 0;
    }

    fn restart(&mut self) {
        self.start = true;
    }

    fn clock(&mut self) {
        if self.start {
            self.start = false;
            self.decay = 15;
            self.divider = self.period;
        } else if self.divider > 0 {
            self.divider -= 1;
        } else {
            self.divider = self.period;
            match (self.decay, self.looping) {
                (0, true) => self.decay = 15,
                (0, false) => {}
                _ => self.decay -= 1,
            }
        }
    }

    fn volume(&self) -> u8 {
        if self.constant { self.period } else { self.decay }
    }
}

/// Pitch-bend unit of a pulse voice. Pulse 1 negates in ones-complement
/// (one lower than pulse 2); the mute condition applies continuously,
/// not just when the divider fires.
#[derive(Clone, Copy, Default)]
struct Sweep {
    enabled: bool,
    negate: bool,
    period: u8,
    shift: u8,
    divider: u8,
    reload: bool,
    ones_complement: bool,
}

impl Sweep {
    fn configure(&mut self, value: u8) {
        self.enabled = value & 0x80 != 0;
        self.period = (value >> 4) & 0x07;
        self.negate = value & 0x08 != 0;
        self.shift = value & 0x07;
        self.reload = true;
    }

    fn target(&self, period: u16) -> u16 {
        let delta = period >> self.shift;
        match (self.negate, self.ones_complement) {
            (false, _) => period.wrapping_add(delta),
            (true, true) => period.wrapping_sub(delta).wrapping_sub(1),
            (true, false) => period.wrapping_sub(delta),
        }
    }

    fn mutes(&self, period: u16) -> bool {
        period < 8 || (self.shift > 0 && self.target(period) > 0x07FF)
    }

    /// Half-frame clock; yields the new timer period when the divider
    /// fires with the channel in sweepable range.
    fn clock(&mut self, period: u16) -> Option<u16> {
        let fired = self.divider == 0;
        if fired || self.reload {
            self.divider = self.period;
            self.reload = false;
        } else {
            self.divider -= 1;
        }

        if fired && self.enabled && self.shift > 0 && !self.mutes(period) {
            Some(self.target(period))
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Default)]
struct PulseChannel {
    enabled: bool,
    duty: u8,
    duty_step: u8,
    timer_period: u16,
    timer: u16,
    length: u8,
    halt_length: bool,
    envelope: Envelope,
    sweep: Sweep,
}

impl PulseChannel {
    fn new(ones_complement: bool) -> Self {
        let mut channel = Self::default();
        channel.sweep.ones_complement = ones_complement;
        channel
    }

    fn set_enabled(&mut self, on: bool) {
        self.enabled = on;
        if !on {
            self.length = 0;
        }
    }

    fn set_control(&mut self, value: u8) {
        self.duty = value >> 6;
        self.halt_length = value & 0x20 != 0;
        self.envelope.configure(value);
    }

    fn set_timer_low(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0x0700) | u16::from(value);
    }

    fn set_timer_high(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0x00FF) | (u16::from(value & 0x07) << 8);
        if self.enabled {
            self.length = LENGTH_TABLE[(value >> 3) as usize];
        }
        self.duty_step = 0;
        self.envelope.restart();
    }

    fn clock_timer(&mut self) {
        if self.timer > 0 {
            self.timer -= 1;
        } else {
            self.timer = self.timer_period;
            self.duty_step = self.duty_step.wrapping_add(1) & 0x07;
        }
    }

    fn clock_length(&mut self) {
        if self.length > 0 && !self.halt_length {
            self.length -= 1;
        }
    }

    fn clock_sweep(&mut self) {
        if let Some(period) = self.sweep.clock(self.timer_period) {
            self.timer_period = period;
        }
    }

    fn output(&self) -> u8 {
        let gate = DUTY_TABLE[self.duty as usize][self.duty_step as usize];
        if !self.enabled || self.length == 0 || gate == 0 || self.sweep.mutes(self.timer_period) {
            0
        } else {
            self.envelope.volume()
        }
    }
}

#[derive(Clone, Copy, Default)]
struct TriangleChannel {
    enabled: bool,
    control: bool,
    linear_reload: u8,
    linear: u8,
    reload_pending: bool,
    timer_period: u16,
    timer: u16,
    length: u8,
    step: u8,
}

impl TriangleChannel {
    fn set_enabled(&mut self, on: bool) {
        self.enabled = on;
        if !on {
            self.length = 0;
        }
    }

    fn set_linear(&mut self, value: u8) {
        self.control = value & 0x80 != 0;
        self.linear_reload = value & 0x7F;
    }

    fn set_timer_low(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0x0700) | u16::from(value);
    }

    fn set_timer_high(&mut self, value: u8) {
        self.timer_period = (self.timer_period & 0x00FF) | (u16::from(value & 0x07) << 8);
        if self.enabled {
            self.length = LENGTH_TABLE[(value >> 3) as usize];
        }
        self.reload_pending = true;
    }

    fn clock_linear(&mut self) {
        if self.reload_pending {
            self.linear = self.linear_reload;
            if !self.control {
                self.reload_pending = false;
            }
        } else if self.linear > 0 {
            self.linear -= 1;
        }
    }

    fn clock_length(&mut self) {
        if self.length > 0 && !self.control {
            self.length -= 1;
        }
    }

    // The sequencer only advances while both counters are live and the
    // period is audible; a muted triangle holds its last level instead of
    // dropping to zero.
    fn clock_timer(&mut self) {
        if self.timer > 0 {
            self.timer -= 1;
            return;
        }
        self.timer = self.timer_period;
        if self.length > 0 && self.linear > 0 && self.timer_period > 1 {
            self.step = self.step.wrapping_add(1) & 0x1F;
        }
    }

    fn output(&self) -> u8 {
        TRI_TABLE[self.step as usize]
    }
}

#[derive(Clone, Copy, Default)]
struct NoiseChannel {
    enabled: bool,
    halt_length: bool,
    mode_flag: bool,
    timer_period: u16,
    timer: u16,
    lfsr: u16,
    length: u8,
    envelope: Envelope,
}

impl NoiseChannel {
    fn new() -> Self {
        Self {
            lfsr: 1,
            timer_period: NOISE_PERIOD_TABLE[0],
            ..Self::default()
        }
    }

    fn set_enabled(&mut self, on: bool) {
        self.enabled = on;
        if !on {
            self.length = 0;
        }
    }

    fn set_control(&mut self, value: u8) {
        self.halt_length = value & 0x20 != 0;
        self.envelope.configure(value);
    }

    fn set_period(&mut self, value: u8) {
        self.mode_flag = value & 0x80 != 0;
        self.timer_period = NOISE_PERIOD_TABLE[(value & 0x0F) as usize];
    }

    fn set_length(&mut self, value: u8) {
        if self.enabled {
            self.length = LENGTH_TABLE[(value >> 3) as usize];
        }
        self.envelope.restart();
    }

    // Feedback is bit 0 XOR bit 6 (mode on) or bit 1; seeded with 1 the
    // register never reaches the all-zero lock state.
    fn clock_timer(&mut self) {
        if self.timer > 0 {
            self.timer -= 1;
            return;
        }
        self.timer = self.timer_period;
        let tap = if self.mode_flag {
            (self.lfsr >> 6) & 1
        } else {
            (self.lfsr >> 1) & 1
        };
        let feedback = (self.lfsr & 1) ^ tap;
        self.lfsr = (self.lfsr >> 1) | (feedback << 14);
    }

    fn clock_length(&mut self) {
        if self.length > 0 && !self.halt_length {
            self.length -= 1;
        }
    }

    fn output(&self) -> u8 {
        if !self.enabled || self.length == 0 || self.lfsr & 1 != 0 {
            0
        } else {
            self.envelope.volume()
        }
    }
}

#[derive(Clone, Copy)]
struct DmcChannel {
    enabled: bool,
    irq_enabled: bool,
    irq_flag: bool,
    loop_flag: bool,
    rate_index: u8,
    timer_period: u16,
    timer_counter: u16,
    output_level: u8,
    sample_addr: u8,
    sample_length: u8,
    current_addr: u16,
    bytes_remaining: u16,
    sample_buffer: Option<u8>,
    shift_register: u8,
    bits_remaining: u8,
    silence: bool,
    dma_pending: bool,
    dma_delay: u8,
}

impl DmcChannel {
    fn new() -> Self {
        Self {
            enabled: false,
            irq_enabled: false,
            irq_flag: false,
            loop_flag: false,
            rate_index: 0,
            timer_period: DMC_RATE_TABLE[0],
            timer_counter: DMC_RATE_TABLE[0],
            output_level: 0,
            sample_addr: 0,
            sample_length: 0,
            current_addr: 0xC000,
            bytes_remaining: 0,
            sample_buffer: None,
            shift_register: 0,
            bits_remaining: 8,
            silence: true,
            dma_pending: false,
            dma_delay: 0,
        }
    }

    fn write_control(&mut self, value: u8) {
        self.irq_enabled = value & 0x80 != 0;
        if !self.irq_enabled {
            self.irq_flag = false;
        }
        self.loop_flag = value & 0x40 != 0;
        self.rate_index = value & 0x0F;
        self.timer_period = DMC_RATE_TABLE[self.rate_index as usize];
        if self.timer_counter == 0 || self.timer_counter > self.timer_period {
            self.timer_counter = self.timer_period;
        }
    }

    fn write_output_level(&mut self, value: u8) {
        self.output_level = value & 0x7F;
    }

    fn write_sample_addr(&mut self, value: u8) {
        self.sample_addr = value;
    }

    fn write_sample_length(&mut self, value: u8) {
        self.sample_length = value;
    }

    fn restart_sample(&mut self) {
        self.current_addr = 0xC000 | (u16::from(self.sample_addr) << 6);
        self.bytes_remaining = (u16::from(self.sample_length) << 4) | 0x0001;
        if self.sample_buffer.is_none() && self.bytes_remaining > 0 {
            self.schedule_dma(2);
        }
    }

    fn playback_active(&self) -> bool {
        self.bytes_remaining > 0 || self.sample_buffer.is_some()
    }

    fn needs_dma(&self) -> bool {
        self.enabled && self.dma_pending && self.dma_delay == 0
    }

    fn current_dma_addr(&self) -> u16 {
        self.current_addr
    }

    fn stop(&mut self) {
        self.bytes_remaining = 0;
        self.dma_pending = false;
        self.dma_delay = 0;
    }

    fn consume_dma_byte(&mut self, byte: u8) {
        self.dma_pending = false;
        self.dma_delay = 0;
        self.sample_buffer = Some(byte);
        if self.bytes_remaining == 0 {
            return;
        }

        // The fetch address wraps from the top of PRG space back to $8000.
        self.current_addr = self.current_addr.checked_add(1).unwrap_or(0x8000);
        self.bytes_remaining -= 1;
        if self.bytes_remaining > 0 {
            return;
        }

        if self.loop_flag {
            self.restart_sample();
        } else if self.irq_enabled {
            self.irq_flag = true;
        }
    }

    fn clock_output_unit(&mut self) {
        if !self.silence {
            // 1 bits step the 7-bit DAC up by two, 0 bits down, saturating.
            let delta: i16 = if self.shift_register & 1 != 0 { 2 } else { -2 };
            let next = self.output_level as i16 + delta;
            if (0..=127).contains(&next) {
                self.output_level = next as u8;
            }
        }

        self.shift_register >>= 1;
        self.bits_remaining = self.bits_remaining.saturating_sub(1);
        if self.bits_remaining > 0 {
            return;
        }

        self.bits_remaining = 8;
        match self.sample_buffer.take() {
            Some(byte) => {
                self.shift_register = byte;
                self.silence = false;
                if self.bytes_remaining > 0 {
                    self.schedule_dma(1);
                }
            }
            None => self.silence = true,
        }
    }

    fn clock_timer(&mut self) {
        if self.dma_pending && self.dma_delay > 0 {
            self.dma_delay -= 1;
        }

        if self.timer_counter == 0 {
            self.timer_counter = self.timer_period;
        }
        self.timer_counter -= 1;
        if self.timer_counter == 0 {
            self.clock_output_unit();
        }
    }

    fn schedule_dma(&mut self, delay: u8) {
        if self.enabled && self.sample_buffer.is_none() && self.bytes_remaining > 0 {
            self.dma_pending = true;
            self.dma_delay = delay;
        }
    }

    fn output(&self) -> u8 {
        self.output_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_pulse1() -> Apu {
        let mut apu = Apu::new();
        apu.write_register(0x4015, 0x01);
        apu.write_register(0x4000, 0x3F); // duty 0, halt, constant volume 15
        apu.write_register(0x4002, 0xFE);
        apu.write_register(0x4003, 0x08); // length index 1, timer high 0
        apu
    }

    #[test]
    fn length_counter_loads_from_table() {
        let apu = enabled_pulse1();
        assert_eq!(apu.pulse1.length, LENGTH_TABLE[1]);
        assert_eq!(apu.pulse1.timer_period, 0x0FE);
    }

    #[test]
    fn disabled_channel_ignores_length_writes() {
        let mut apu = Apu::new();
        apu.write_register(0x4003, 0x08);
        assert_eq!(apu.pulse1.length, 0);
    }

    #[test]
    fn status_disable_zeroes_length() {
        let mut apu = enabled_pulse1();
        assert!(apu.read_status() & 0x01 != 0);
        apu.write_register(0x4015, 0x00);
        assert_eq!(apu.pulse1.length, 0);
        assert_eq!(apu.read_status() & 0x01, 0);
    }

    #[test]
    fn pulse_emits_at_duty_high_points() {
        let mut apu = enabled_pulse1();
        let mut peak = 0u8;
        for _ in 0..(2 * 8 * 0x100) {
            apu.pulse1.clock_timer();
            peak = peak.max(apu.pulse1.output());
        }
        assert_eq!(peak, 15);
    }

    #[test]
    fn sweep_mutes_below_minimum_period() {
        let mut apu = enabled_pulse1();
        apu.pulse1.timer_period = 7;
        apu.pulse1.duty_step = 1; // duty high point
        assert_eq!(apu.pulse1.output(), 0);
    }

    #[test]
    fn sweep_mutes_when_target_overflows() {
        let mut apu = enabled_pulse1();
        apu.write_register(0x4001, 0x01); // shift 1, negate off
        apu.pulse1.timer_period = 0x600; // target 0x900 > 0x7FF
        apu.pulse1.duty_step = 1;
        assert_eq!(apu.pulse1.output(), 0);
    }

    #[test]
    fn sweep_updates_period_in_range() {
        let mut apu = enabled_pulse1();
        apu.write_register(0x4001, 0x81); // enabled, shift 1
        apu.pulse1.sweep.divider = 0;
        apu.pulse1.sweep.reload = false;
        apu.pulse1.timer_period = 0x100;
        apu.pulse1.clock_sweep();
        assert_eq!(apu.pulse1.timer_period, 0x180);
    }

    #[test]
    fn pulse1_negate_subtracts_ones_complement() {
        let mut apu = Apu::new();
        apu.write_register(0x4001, 0x89); // negate, shift 1
        assert_eq!(apu.pulse1.sweep.target(0x100), 0x100 - 0x80 - 1);

        apu.pulse2.sweep.negate = true;
        apu.pulse2.sweep.shift = 1;
        assert_eq!(apu.pulse2.sweep.target(0x100), 0x100 - 0x80);
    }

    #[test]
    fn triangle_freezes_at_last_level_when_muted() {
        let mut apu = Apu::new();
        apu.write_register(0x4015, 0x04);
        apu.write_register(0x4008, 0x7F);
        apu.write_register(0x400A, 0x80);
        apu.write_register(0x400B, 0x08);
        apu.triangle.clock_linear(); // latch the linear reload

        for _ in 0..5 {
            apu.triangle.clock_timer();
        }
        let level = apu.triangle.output();

        // Kill the linear counter; output holds instead of dropping to 0.
        apu.triangle.linear = 0;
        let step_before = apu.triangle.step;
        for _ in 0..1000 {
            apu.triangle.clock_timer();
        }
        assert_eq!(apu.triangle.step, step_before);
        assert_eq!(apu.triangle.output(), level);
    }

    #[test]
    fn noise_lfsr_uses_mode_taps() {
        let mut apu = Apu::new();
        apu.noise.lfsr = 0x0001;
        apu.noise.timer = 0;
        apu.noise.clock_timer(); // bit0=1, bit1=0 -> feedback 1
        assert_eq!(apu.noise.lfsr, 0x4000);

        apu.noise.mode_flag = true;
        apu.noise.lfsr = 0x0040; // bit6 set, bit0 clear
        apu.noise.timer = 0;
        apu.noise.clock_timer();
        assert_eq!(apu.noise.lfsr, 0x4020);
    }

    #[test]
    fn frame_irq_fires_in_4step_mode_only() {
        let mut apu = Apu::new();
        for _ in 0..FC_STEP_4 {
            apu.tick();
        }
        assert!(apu.irq_pending());
        assert!(apu.read_status() & 0x40 != 0);
        assert!(!apu.irq_pending(), "status read acknowledges");

        let mut apu = Apu::new();
        apu.write_register(0x4017, 0x80);
        for _ in 0..FC_5STEP_WRAP {
            apu.tick();
        }
        assert!(!apu.irq_pending());
    }

    #[test]
    fn frame_counter_write_clocks_immediately_with_bit7() {
        let mut apu = enabled_pulse1();
        apu.write_register(0x4000, 0x1F); // clear halt so length can count
        let before = apu.pulse1.length;
        apu.write_register(0x4017, 0x80);
        for _ in 0..4 {
            apu.tick();
        }
        assert_eq!(apu.pulse1.length, before - 1);
    }

    #[test]
    fn dmc_address_wraps_to_8000() {
        let mut apu = Apu::new();
        apu.dmc.enabled = true;
        apu.dmc.current_addr = 0xFFFF;
        apu.dmc.bytes_remaining = 2;
        apu.dmc.consume_dma_byte(0xAA);
        assert_eq!(apu.dmc.current_addr, 0x8000);
    }

    #[test]
    fn sample_ring_drops_oldest_when_full() {
        let mut apu = Apu::new();
        apu.max_queued_samples = 4;
        for _ in 0..6 {
            apu.push_sample(0.0);
        }
        apu.push_sample(1.0);
        assert_eq!(apu.samples.len(), 4);
        assert_eq!(apu.take_samples().last().copied(), Some(i16::MAX));
    }
}
