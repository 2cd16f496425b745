use anchor_lang::prelude::*;
use anchor_lang::system_program;
use solana_hash::Hash;
use solana_program::sysvar::instructions;

pub mod ed25519;

use ed25519::{verify_house_signature, ED25519_SIGNATURE_LEN};

declare_id!("6e1s9bowX6EH3CkE5bvzwBMEKuMZLDSTR5gUDdfwtyrQ");

/// Dice Escrow Protocol
/// A house funds a per-house escrow vault; players stake lamports against a
/// chosen win-probability. Randomness comes from the house's ed25519
/// signature over the bet account's own bytes, verified through the
/// instructions sysvar, so the outcome is unpredictable before signing and
/// auditable afterwards.

/// Roll space: thresholds and rolls live in [0, 100).
pub const MODULUS: u64 = 100;

/// Slots a bet must stay open before the player can reclaim the stake
/// (~7min, congestion margin included).
pub const REFUND_DELAY_SLOTS: u64 = 1000;

#[program]
pub mod dice_escrow {
    use super::*;

    /// Fund the house vault with initial liquidity
    pub fn initialize(ctx: Context<Initialize>, amount: u64) -> Result<()> {
        let floor = Rent::get()?.minimum_balance(0);
        require!(amount > 0 && amount >= floor, DiceError::InvalidAmount);
        // One vault per house: the derived address is a pure function of the
        // house key, so a funded vault means initialize already ran.
        require!(
            ctx.accounts.vault.lamports() == 0,
            DiceError::AccountAlreadyExists
        );

        let cpi_context = CpiContext::new(
            ctx.accounts.system_program.to_account_info(),
            system_program::Transfer {
                from: ctx.accounts.house.to_account_info(),
                to: ctx.accounts.vault.to_account_info(),
            },
        );
        system_program::transfer(cpi_context, amount)?;

        emit!(VaultFunded {
            house: ctx.accounts.house.key(),
            vault: ctx.accounts.vault.key(),
            amount,
        });

        Ok(())
    }

    /// Stake lamports on a roll under `win_threshold`
    /// * `seed` - player-chosen nonce; each value is usable once per vault
    /// * `win_threshold` - win probability out of 100, in [1, 99]
    /// * `stake` - lamports escrowed into the bet record
    pub fn place_bet(
        ctx: Context<PlaceBet>,
        seed: u128,
        win_threshold: u8,
        stake: u64,
    ) -> Result<()> {
        require!(
            win_threshold >= 1 && (win_threshold as u64) < MODULUS,
            DiceError::InvalidThreshold
        );
        require!(stake > 0, DiceError::InvalidAmount);

        // Worst case the vault owes the full payout; refuse bets it cannot cover.
        let payout_ceiling = max_payout(stake, win_threshold)?;
        require!(
            ctx.accounts.vault.lamports() >= payout_ceiling,
            DiceError::VaultInsufficientLiquidity
        );

        let clock = Clock::get()?;
        let bet = &mut ctx.accounts.bet;
        bet.player = ctx.accounts.player.key();
        bet.vault = ctx.accounts.vault.key();
        bet.seed = seed;
        bet.win_threshold = win_threshold;
        bet.stake = stake;
        bet.slot = clock.slot;
        bet.bump = ctx.bumps.bet;

        // Stake escrows inside the bet record until settlement.
        let cpi_context = CpiContext::new(
            ctx.accounts.system_program.to_account_info(),
            system_program::Transfer {
                from: ctx.accounts.player.to_account_info(),
                to: ctx.accounts.bet.to_account_info(),
            },
        );
        system_program::transfer(cpi_context, stake)?;

        emit!(BetPlaced {
            player: ctx.accounts.player.key(),
            vault: ctx.accounts.vault.key(),
            seed,
            win_threshold,
            stake,
            max_payout: payout_ceiling,
            slot: clock.slot,
        });

        Ok(())
    }

    /// Settle a bet from the house signature over the bet record bytes
    /// * `sig` - 64-byte ed25519 signature, matched against the preceding
    ///   ed25519 verification instruction in this transaction
    pub fn resolve_bet(ctx: Context<ResolveBet>, sig: Vec<u8>) -> Result<()> {
        require!(
            sig.len() == ED25519_SIGNATURE_LEN,
            DiceError::SignatureVerificationFailed
        );

        let bet = &ctx.accounts.bet;
        let message = bet.to_slice();
        verify_house_signature(
            &ctx.accounts.instruction_sysvar.to_account_info(),
            &ctx.accounts.house.key(),
            &message,
            &sig,
        )?;

        let roll = derive_roll(&sig);
        let won = is_win(roll, bet.win_threshold);
        let payout = if won {
            max_payout(bet.stake, bet.win_threshold)?
        } else {
            0
        };

        if won {
            let house_key = ctx.accounts.house.key();
            let signer_seeds: &[&[u8]] =
                &[b"vault", house_key.as_ref(), &[ctx.bumps.vault]];
            let signer_seeds = &[signer_seeds];
            let cpi_context = CpiContext::new_with_signer(
                ctx.accounts.system_program.to_account_info(),
                system_program::Transfer {
                    from: ctx.accounts.vault.to_account_info(),
                    to: ctx.accounts.player.to_account_info(),
                },
                signer_seeds,
            );
            system_program::transfer(cpi_context, payout)?;
        } else {
            // Forfeited stake leaves the record before `close` refunds the rent.
            **ctx.accounts.bet.to_account_info().try_borrow_mut_lamports()? -= bet.stake;
            **ctx.accounts.vault.to_account_info().try_borrow_mut_lamports()? += bet.stake;
        }

        emit!(BetResolved {
            player: bet.player,
            vault: bet.vault,
            seed: bet.seed,
            roll,
            won,
            payout,
        });

        Ok(())
    }

    /// Reclaim the stake of a bet the house never resolved
    pub fn refund_bet(ctx: Context<RefundBet>) -> Result<()> {
        let bet = &ctx.accounts.bet;
        let clock = Clock::get()?;
        require!(
            clock.slot >= bet.slot.saturating_add(REFUND_DELAY_SLOTS),
            DiceError::RefundUnavailable
        );

        // Stake and rent both sit in the record; `close = player` returns them.
        emit!(BetRefunded {
            player: bet.player,
            vault: bet.vault,
            seed: bet.seed,
            stake: bet.stake,
        });

        Ok(())
    }
}

// === Helper Functions ===

/// Gross payout the vault owes on a win: `stake * 100 / win_threshold`,
/// truncating division.
fn max_payout(stake: u64, win_threshold: u8) -> Result<u64> {
    let gross = stake as u128 * MODULUS as u128 / win_threshold as u128;
    u64::try_from(gross).map_err(|_| error!(DiceError::Overflow))
}

/// Reduce a verified signature to a roll in [0, 100): sum the two LE u128
/// halves of its SHA-256 digest, mod 100.
fn derive_roll(sig: &[u8]) -> u8 {
    let digest: Hash = solana_sha256_hasher::hash(sig);
    let bytes = digest.to_bytes();
    let mut half = [0u8; 16];
    half.copy_from_slice(&bytes[..16]);
    let lower = u128::from_le_bytes(half);
    half.copy_from_slice(&bytes[16..]);
    let upper = u128::from_le_bytes(half);
    (lower.wrapping_add(upper) % MODULUS as u128) as u8
}

// Ties go to the house.
fn is_win(roll: u8, win_threshold: u8) -> bool {
    roll < win_threshold
}

// === Account Structures ===

#[derive(Accounts)]
pub struct Initialize<'info> {
    #[account(mut)]
    pub house: Signer<'info>,

    #[account(
        mut,
        seeds = [b"vault", house.key().as_ref()],
        bump
    )]
    pub vault: SystemAccount<'info>,

    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(seed: u128)]
pub struct PlaceBet<'info> {
    #[account(mut)]
    pub player: Signer<'info>,

    /// CHECK: house identity; only fixes the vault derivation
    pub house: UncheckedAccount<'info>,

    #[account(
        mut,
        seeds = [b"vault", house.key().as_ref()],
        bump
    )]
    pub vault: SystemAccount<'info>,

    #[account(
        init,
        payer = player,
        space = 8 + Bet::INIT_SPACE,
        seeds = [b"bet", vault.key().as_ref(), seed.to_le_bytes().as_ref()],
        bump
    )]
    pub bet: Account<'info, Bet>,

    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct ResolveBet<'info> {
    #[account(mut)]
    pub house: Signer<'info>,

    /// CHECK: settlement counterparty; `has_one` on the bet pins it to the
    /// recorded player
    #[account(mut)]
    pub player: UncheckedAccount<'info>,

    #[account(
        mut,
        seeds = [b"vault", house.key().as_ref()],
        bump
    )]
    pub vault: SystemAccount<'info>,

    #[account(
        mut,
        close = player,
        has_one = player @ DiceError::Unauthorized,
        seeds = [b"bet", vault.key().as_ref(), bet.seed.to_le_bytes().as_ref()],
        bump = bet.bump
    )]
    pub bet: Account<'info, Bet>,

    /// CHECK: instructions sysvar, address-pinned
    #[account(address = instructions::ID @ DiceError::StaleOrMissingCoInstruction)]
    pub instruction_sysvar: AccountInfo<'info>,

    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
pub struct RefundBet<'info> {
    #[account(mut)]
    pub player: Signer<'info>,

    /// CHECK: house identity; only fixes the vault derivation
    pub house: UncheckedAccount<'info>,

    #[account(
        seeds = [b"vault", house.key().as_ref()],
        bump
    )]
    pub vault: SystemAccount<'info>,

    #[account(
        mut,
        close = player,
        has_one = player @ DiceError::Unauthorized,
        seeds = [b"bet", vault.key().as_ref(), bet.seed.to_le_bytes().as_ref()],
        bump = bet.bump
    )]
    pub bet: Account<'info, Bet>,

    pub system_program: Program<'info, System>,
}

// === State Accounts ===

/// One open wager. Field order and widths are frozen: the account data minus
/// the 8-byte discriminator is exactly the message the house signs, so any
/// layout change invalidates every outstanding signature.
#[account]
#[derive(InitSpace)]
pub struct Bet {
    pub player: Pubkey,
    pub vault: Pubkey,
    pub seed: u128,
    pub win_threshold: u8,
    pub stake: u64,
    pub slot: u64,
    pub bump: u8,
}

impl Bet {
    /// The exact byte image the house signs (account data sans discriminator).
    pub fn to_slice(&self) -> Vec<u8> {
        let mut message = self.player.to_bytes().to_vec();
        message.extend_from_slice(&self.vault.to_bytes());
        message.extend_from_slice(&self.seed.to_le_bytes());
        message.push(self.win_threshold);
        message.extend_from_slice(&self.stake.to_le_bytes());
        message.extend_from_slice(&self.slot.to_le_bytes());
        message.push(self.bump);
        message
    }
}

// === Events ===

#[event]
pub struct VaultFunded {
    pub house: Pubkey,
    pub vault: Pubkey,
    pub amount: u64,
}

#[event]
pub struct BetPlaced {
    pub player: Pubkey,
    pub vault: Pubkey,
    pub seed: u128,
    pub win_threshold: u8,
    pub stake: u64,
    pub max_payout: u64,
    pub slot: u64,
}

#[event]
pub struct BetResolved {
    pub player: Pubkey,
    pub vault: Pubkey,
    pub seed: u128,
    pub roll: u8,
    pub won: bool,
    pub payout: u64,
}

#[event]
pub struct BetRefunded {
    pub player: Pubkey,
    pub vault: Pubkey,
    pub seed: u128,
    pub stake: u64,
}

// === Errors ===

#[error_code]
pub enum DiceError {
    #[msg("Amount must cover the rent-exempt minimum")]
    InvalidAmount,
    #[msg("Win threshold must be between 1 and 99")]
    InvalidThreshold,
    #[msg("Vault cannot cover the maximum payout for this bet")]
    VaultInsufficientLiquidity,
    #[msg("A vault already exists for this house")]
    AccountAlreadyExists,
    #[msg("Ed25519 co-instruction does not match this bet")]
    SignatureVerificationFailed,
    #[msg("Expected an ed25519 verification instruction immediately before this one")]
    StaleOrMissingCoInstruction,
    #[msg("Signer is not authorized for this operation")]
    Unauthorized,
    #[msg("Payout calculation overflowed")]
    Overflow,
    #[msg("Refund window has not elapsed")]
    RefundUnavailable,
}
